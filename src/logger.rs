use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::diff::diff_json;

pub enum MessageLogMode {
    Full,
    Diffed,
}

/// Appends one JSON object per line for every request, write and
/// refreshed entity snapshot.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_snapshot: Option<Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_snapshot: None,
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
        });
        self.write_line(&entry);
    }

    pub fn log_page(&mut self, page: &str, status: u16, bytes: usize) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "page",
            "page": page,
            "status": status,
            "bytes": bytes,
        });
        self.write_line(&entry);
    }

    pub fn log_write(&mut self, prop: &str, value: &str, strategy: &str, accepted: bool) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "write",
            "prop": prop,
            "value": value,
            "strategy": strategy,
            "accepted": accepted,
        });
        self.write_line(&entry);
    }

    pub fn log_snapshot(&mut self, snapshot: &Value) {
        let entry = match (&self.mode, &self.previous_snapshot) {
            (MessageLogMode::Diffed, Some(prev)) => {
                let mut changes = Vec::new();
                diff_json(prev, snapshot, "", &mut changes);
                let change_entries: Vec<Value> = changes
                    .iter()
                    .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                    .collect();
                json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "snapshot",
                    "changes": change_entries,
                })
            }
            (MessageLogMode::Diffed, None) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "snapshot",
                "full": true,
                "body": snapshot,
            }),
            (MessageLogMode::Full, _) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "snapshot",
                "body": snapshot,
            }),
        };
        self.write_line(&entry);
        if matches!(self.mode, MessageLogMode::Diffed) {
            self.previous_snapshot = Some(snapshot.clone());
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}
