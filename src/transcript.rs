use crate::notify::Notice;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSONL log of everything the client did in one run
pub struct Transcript {
    pub path: PathBuf,
    run_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl Transcript {
    pub fn new(path: &Path, run_id: &str) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            run_id: run_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            run_id: &self.run_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn notice(&mut self, notice: &Notice) -> Result<()> {
        self.log(
            "notice",
            serde_json::json!({
                "level": notice.level.as_str(),
                "title": notice.title,
                "detail": notice.detail,
            }),
        )
    }

    pub fn command(&mut self, line: &str) -> Result<()> {
        self.log("command", serde_json::json!({ "line": line }))
    }

    pub fn wallet_connected(&mut self, address: &str) -> Result<()> {
        self.log("wallet_connected", serde_json::json!({ "address": address }))
    }

    pub fn wallet_disconnected(&mut self) -> Result<()> {
        self.log("wallet_disconnected", serde_json::json!({}))
    }

    /// Log a connect attempt and how it ended
    pub fn connect_outcome(
        &mut self,
        outcome: &str,
        node: Option<&str>,
        tx: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.log(
            "session_connect",
            serde_json::json!({
                "outcome": outcome,
                "node": node,
                "tx": tx,
                "error": error,
            }),
        )
    }

    /// Log a disconnect attempt and how it ended
    pub fn disconnect_outcome(
        &mut self,
        outcome: &str,
        settled: Option<bool>,
        tx: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.log(
            "session_disconnect",
            serde_json::json!({
                "outcome": outcome,
                "settled": settled,
                "tx": tx,
                "error": error,
            }),
        )
    }

    pub fn config_saved(&mut self, session_id: i64, path: &Path) -> Result<()> {
        self.log(
            "config_saved",
            serde_json::json!({
                "session_id": session_id,
                "path": path,
            }),
        )
    }
}
