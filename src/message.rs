use std::collections::BTreeMap;
use std::fmt;
use std::string::FromUtf8Error;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

pub const PORTFOLIO_UPDATE: &str = "PORTFOLIO_UPDATE";
pub const NEWS_ALERT: &str = "NEWS_ALERT";
pub const AGENT_THOUGHT: &str = "AGENT_THOUGHT";

/// One decoded server frame. Each variant replaces its own slice of the
/// dashboard state independently of the others.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Portfolio(PortfolioSnapshot),
    News(NewsItem),
    AgentThought(AgentThought),
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Portfolio(_) => PORTFOLIO_UPDATE,
            InboundMessage::News(_) => NEWS_ALERT,
            InboundMessage::AgentThought(_) => AGENT_THOUGHT,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid utf-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error("frame is not a message envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

pub fn decode_text(text: &str) -> Result<InboundMessage, DecodeError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(DecodeError::Envelope)?;
    // A missing or null payload degrades to an all-default one.
    let data = match envelope.data {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    match envelope.kind.as_str() {
        PORTFOLIO_UPDATE => payload(PORTFOLIO_UPDATE, data).map(InboundMessage::Portfolio),
        NEWS_ALERT => payload(NEWS_ALERT, data).map(InboundMessage::News),
        AGENT_THOUGHT => payload(AGENT_THOUGHT, data).map(InboundMessage::AgentThought),
        _ => Err(DecodeError::UnknownType(envelope.kind)),
    }
}

pub fn decode_binary(bytes: Vec<u8>) -> Result<InboundMessage, DecodeError> {
    let text = String::from_utf8(bytes)?;
    decode_text(&text)
}

fn payload<T>(kind: &'static str, data: Value) -> Result<T, DecodeError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(data).map_err(|source| DecodeError::Payload { kind, source })
}

fn zero_if_null<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn holdings_zero_if_null<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let holdings: Option<BTreeMap<String, Option<f64>>> = Option::deserialize(deserializer)?;
    Ok(holdings
        .unwrap_or_default()
        .into_iter()
        .map(|(ticker, qty)| (ticker, qty.unwrap_or_default()))
        .collect())
}

/// Only the exact upper-case words the trading engine acts on are
/// recognised; anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
    Other(String),
}

impl TradeAction {
    pub fn label(&self) -> &str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::Hold => "HOLD",
            TradeAction::Other(label) => label,
        }
    }
}

impl Default for TradeAction {
    fn default() -> Self {
        TradeAction::Hold
    }
}

impl From<String> for TradeAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "BUY" => TradeAction::Buy,
            "SELL" => TradeAction::Sell,
            "HOLD" => TradeAction::Hold,
            _ => TradeAction::Other(value),
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PortfolioSnapshot {
    #[serde(default, deserialize_with = "zero_if_null")]
    pub cash: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub portfolio_value: f64,
    #[serde(default, deserialize_with = "holdings_zero_if_null")]
    pub positions: BTreeMap<String, f64>,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub trade_log: Vec<TradeRecord>,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub roi: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub realized_pnl: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub total_trades: u64,
}

impl PortfolioSnapshot {
    /// State shown before the backend has sent its first snapshot.
    pub fn opening(initial_capital: f64) -> Self {
        PortfolioSnapshot {
            cash: initial_capital,
            portfolio_value: initial_capital,
            ..PortfolioSnapshot::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TradeRecord {
    #[serde(default, deserialize_with = "zero_if_null")]
    pub ticker: String,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub action: TradeAction,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub qty: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub price: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub time: String,
    #[serde(default)]
    pub pnl: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewsItem {
    #[serde(default, deserialize_with = "zero_if_null")]
    pub title: String,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub source: String,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub published: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AgentThought {
    #[serde(default, deserialize_with = "zero_if_null")]
    pub article: String,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub action: TradeAction,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub live_price: Option<f64>,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub thought: String,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub confidence: f64,
}

impl AgentThought {
    pub fn ticker(&self) -> Option<&str> {
        self.ticker
            .as_deref()
            .map(str::trim)
            .filter(|ticker| !ticker.is_empty())
    }

    /// A zero or negative quote means the backend could not price the ticker.
    pub fn live_price(&self) -> Option<f64> {
        self.live_price
            .filter(|price| price.is_finite() && *price > 0.0)
    }

    pub fn confidence_percent(&self) -> u32 {
        if !self.confidence.is_finite() {
            return 0;
        }
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_portfolio_update() {
        let raw = r#"{
            "type": "PORTFOLIO_UPDATE",
            "data": {
                "cash": 95000.5,
                "portfolio_value": 101250.25,
                "positions": {"NVDA": 12, "AAPL": 30},
                "trade_log": [{
                    "time": "2024-05-01T14:03:22.123456",
                    "action": "SELL",
                    "ticker": "TSLA",
                    "qty": 5,
                    "price": 180.5,
                    "pnl": -12.75,
                    "reason": "Guidance cut"
                }],
                "roi": 1.25,
                "realized_pnl": 300.0,
                "total_trades": 7
            }
        }"#;
        let InboundMessage::Portfolio(snapshot) = decode_text(raw).expect("should decode") else {
            panic!("expected a portfolio snapshot");
        };
        assert_eq!(snapshot.cash, 95000.5);
        assert_eq!(snapshot.portfolio_value, 101250.25);
        assert_eq!(snapshot.total_trades, 7);
        let tickers: Vec<&str> = snapshot.positions.keys().map(String::as_str).collect();
        assert_eq!(tickers, vec!["AAPL", "NVDA"]);
        let trade = &snapshot.trade_log[0];
        assert_eq!(trade.action, TradeAction::Sell);
        assert_eq!(trade.qty, 5.0);
        assert_eq!(trade.pnl, Some(-12.75));
        assert_eq!(trade.reason.as_deref(), Some("Guidance cut"));
    }

    #[test]
    fn missing_and_null_fields_fall_back_to_zero() {
        let raw = r#"{"type":"PORTFOLIO_UPDATE","data":{"cash":10,"roi":null,"trade_log":null}}"#;
        let InboundMessage::Portfolio(snapshot) = decode_text(raw).expect("should decode") else {
            panic!("expected a portfolio snapshot");
        };
        assert_eq!(snapshot.cash, 10.0);
        assert_eq!(snapshot.roi, 0.0);
        assert_eq!(snapshot.realized_pnl, 0.0);
        assert_eq!(snapshot.total_trades, 0);
        assert!(snapshot.positions.is_empty());
        assert!(snapshot.trade_log.is_empty());
    }

    #[test]
    fn null_position_quantities_fall_back_to_zero() {
        let raw = r#"{"type":"PORTFOLIO_UPDATE","data":{"cash":5,"positions":{"AAPL":null,"MSFT":3}}}"#;
        let InboundMessage::Portfolio(snapshot) = decode_text(raw).expect("should decode") else {
            panic!("expected a portfolio snapshot");
        };
        assert_eq!(snapshot.cash, 5.0);
        assert_eq!(
            snapshot.positions,
            BTreeMap::from([("AAPL".to_string(), 0.0), ("MSFT".to_string(), 3.0)])
        );
    }

    #[test]
    fn missing_payload_degrades_to_defaults() {
        let message = decode_text(r#"{"type":"NEWS_ALERT"}"#).expect("should decode");
        assert_eq!(message, InboundMessage::News(NewsItem::default()));
    }

    #[test]
    fn decodes_news_and_ignores_unknown_fields() {
        let raw = r#"{"type":"NEWS_ALERT","data":{"title":"Fed holds rates","source":"Reuters","published":"Wed, 01 May 2024 18:00:00 GMT","sentiment":0.4}}"#;
        let InboundMessage::News(item) = decode_text(raw).expect("should decode") else {
            panic!("expected a news item");
        };
        assert_eq!(item.title, "Fed holds rates");
        assert_eq!(item.source, "Reuters");
        assert_eq!(item.link, None);
    }

    #[test]
    fn decodes_agent_thought_with_optional_fields() {
        let raw = r#"{"type":"AGENT_THOUGHT","data":{"article":"Chip demand surges","thought":"Momentum","action":"BUY","confidence":0.826,"ticker":"NVDA","live_price":912.4}}"#;
        let InboundMessage::AgentThought(thought) = decode_text(raw).expect("should decode") else {
            panic!("expected an agent thought");
        };
        assert_eq!(thought.action, TradeAction::Buy);
        assert_eq!(thought.ticker(), Some("NVDA"));
        assert_eq!(thought.live_price(), Some(912.4));
        assert_eq!(thought.confidence_percent(), 83);
    }

    #[test]
    fn agent_thought_hides_blank_ticker_and_zero_price() {
        let raw = r#"{"type":"AGENT_THOUGHT","data":{"action":"HOLD","ticker":"","live_price":0.0,"confidence":1.7}}"#;
        let InboundMessage::AgentThought(thought) = decode_text(raw).expect("should decode") else {
            panic!("expected an agent thought");
        };
        assert_eq!(thought.ticker(), None);
        assert_eq!(thought.live_price(), None);
        assert_eq!(thought.confidence_percent(), 100);
    }

    #[test]
    fn unrecognised_action_keeps_its_label() {
        let action = TradeAction::from("WAIT".to_string());
        assert_eq!(action, TradeAction::Other("WAIT".to_string()));
        assert_eq!(action.to_string(), "WAIT");
    }

    #[test]
    fn action_words_match_case_sensitively() {
        let raw = r#"{"type":"AGENT_THOUGHT","data":{"action":"buy"}}"#;
        let InboundMessage::AgentThought(thought) = decode_text(raw).expect("should decode") else {
            panic!("expected an agent thought");
        };
        assert_eq!(thought.action, TradeAction::Other("buy".to_string()));
        assert_eq!(thought.action.label(), "buy");
        assert_eq!(
            TradeAction::from(" SELL ".to_string()),
            TradeAction::Other(" SELL ".to_string())
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let err = decode_text(r#"{"type":"HEARTBEAT","data":{}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(kind) if kind == "HEARTBEAT"));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = decode_text("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Envelope(_)));
    }

    #[test]
    fn rejects_mistyped_payload() {
        let err = decode_text(r#"{"type":"PORTFOLIO_UPDATE","data":{"cash":"lots"}}"#).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Payload {
                kind: PORTFOLIO_UPDATE,
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let err = decode_binary(vec![0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUtf8(_)));
    }
}
