use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Connection,
    Decode,
}

/// One journal line.
#[derive(Serialize)]
struct FaultRecord<'a> {
    timestamp_ms: i64,
    kind: FaultKind,
    message: &'a str,
}

/// Append-only JSONL journal of faults the dashboard recovered from.
#[derive(Clone, Debug)]
pub struct FaultLogStore {
    path: PathBuf,
}

impl FaultLogStore {
    pub fn new(path: PathBuf) -> Self {
        FaultLogStore { path }
    }

    pub fn record(&self, kind: FaultKind, message: &str) -> Result<()> {
        let mut line = serde_json::to_vec(&FaultRecord {
            timestamp_ms: Local::now().timestamp_millis(),
            kind,
            message,
        })?;
        line.push(b'\n');

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating fault journal directory {}", dir.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(&line))
            .with_context(|| format!("appending to fault journal {}", self.path.display()))
    }
}
