use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use clap::builder::RangedU64ValueParser;

use crate::connection::DEFAULT_ENDPOINT;
use crate::dashboard::{DEFAULT_INITIAL_CAPITAL, DEFAULT_NEWS_CAPACITY};

#[derive(Parser, Clone, Debug)]
#[clap(about = "Terminal dashboard for a live AI paper-trading backend")]
pub struct CliParams {
    /// WebSocket endpoint the backend pushes updates on
    #[clap(long = "endpoint", value_name = "URL", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Fixed delay before reconnecting after a close (e.g., 3s, 500ms, 1m)
    #[clap(long = "reconnect-delay", value_name = "DURATION", default_value = "3s")]
    pub reconnect_delay: DurationSpec,

    /// Number of news items kept in the rolling news panel
    #[clap(
        long = "news-capacity",
        value_name = "N",
        default_value_t = DEFAULT_NEWS_CAPACITY,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub news_capacity: usize,

    /// Starting capital the backend's paper account was funded with
    #[clap(
        long = "initial-capital",
        value_name = "AMOUNT",
        default_value_t = DEFAULT_INITIAL_CAPITAL
    )]
    pub initial_capital: f64,

    /// Diagnostic log file (the terminal itself is owned by the UI)
    #[clap(long = "log-file", value_name = "PATH", default_value = "dashboard.log")]
    pub log_file: PathBuf,

    /// JSONL journal of discarded frames and connection faults
    #[clap(
        long = "fault-log",
        value_name = "PATH",
        default_value = "dashboard_faults.jsonl"
    )]
    pub fault_log: PathBuf,
}

impl CliParams {
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay.as_duration()
    }

    pub fn news_capacity(&self) -> usize {
        self.news_capacity
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.trim()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DurationSpec(Duration);

impl DurationSpec {
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for DurationSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let duration = parse_duration_spec(s)?;
        Ok(DurationSpec(duration))
    }
}

/// Milliseconds per accepted unit suffix.
const DELAY_UNITS: &[(&str, f64)] = &[
    ("ms", 1.0),
    ("s", 1_000.0),
    ("m", 60_000.0),
    ("h", 3_600_000.0),
    ("d", 86_400_000.0),
];

fn parse_duration_spec(input: &str) -> Result<Duration, String> {
    let spec = input.trim();
    let amount_end = spec
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(spec.len());
    let (amount, unit) = spec.split_at(amount_end);
    if amount.is_empty() {
        return Err(format!("delay `{spec}` must start with a number, e.g. 3s or 500ms"));
    }
    let unit = unit.trim().to_ascii_lowercase();
    if unit.is_empty() {
        return Err(format!("delay `{spec}` needs a unit: ms, s, m, h or d"));
    }
    let millis_per_unit = DELAY_UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, millis)| *millis)
        .ok_or_else(|| format!("unknown unit `{unit}` in delay `{spec}` (use ms, s, m, h or d)"))?;
    let amount: f64 = amount
        .parse()
        .map_err(|_| format!("delay `{spec}` has an invalid number"))?;
    Duration::try_from_secs_f64(amount * millis_per_unit / 1_000.0)
        .ok()
        .filter(|delay| !delay.is_zero())
        .ok_or_else(|| format!("delay `{spec}` must be positive and finite"))
}
