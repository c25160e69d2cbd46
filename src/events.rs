//! Run events.
//!
//! Every stage of a run reports to an [`EventBus`]: a bounded
//! `tokio::sync::broadcast` channel. Sending never blocks; when a
//! subscriber falls behind it loses the oldest events and sees a lag
//! notice instead. Events are advisory, so a bus with no subscribers is
//! fine.
//!
//! Each event serializes as
//!
//! ```json
//! {"run_id": "…", "timestamp": "2026-01-01T00:00:00Z",
//!  "stage": "llm", "type": "status", "payload": {"status": "running", "message": "…"}}
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Status,
    Log,
    Summary,
    Change,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Running,
    Completed,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub payload: Value,
}

impl Event {
    /// The payload's `message`, or an empty string.
    pub fn message(&self) -> &str {
        self.payload.get("message").and_then(Value::as_str).unwrap_or("")
    }

    /// The payload's `status`, if this is a status event.
    pub fn status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }
}

/// Record of one accepted file, published as a `change` event.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeRecord {
    pub title: String,
    pub description: String,
    pub file: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// Totals published as the final `summary` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub files: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub unchanged: usize,
    pub errored: usize,
    pub canceled: usize,
    pub fallback_chunks: usize,
}

/// Broadcast sink for run events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    run_id: Uuid,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, stage: &str, kind: EventType, payload: Value) {
        let _ = self.tx.send(Event {
            run_id: self.run_id,
            timestamp: Utc::now(),
            stage: stage.to_string(),
            kind,
            payload,
        });
    }

    pub fn status(&self, stage: &str, status: Status, message: impl Into<String>) {
        self.emit(
            stage,
            EventType::Status,
            json!({ "status": status.as_str(), "message": message.into() }),
        );
    }

    pub fn log(&self, stage: &str, message: impl Into<String>) {
        self.emit(stage, EventType::Log, json!({ "message": message.into() }));
    }

    pub fn change(&self, record: &ChangeRecord) {
        let mut payload = serde_json::to_value(record).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut payload {
            map.insert(
                "message".to_string(),
                Value::String(format!("{}: {}", record.file, record.title)),
            );
        }
        self.emit("write", EventType::Change, payload);
    }

    pub fn rejection(&self, file: &Path, reasons: &[String]) {
        self.emit(
            "validation",
            EventType::Status,
            json!({
                "status": Status::Error.as_str(),
                "file": file.display().to_string(),
                "reasons": reasons,
                "message": format!("{} rejected: {}", file.display(), reasons.join("; ")),
            }),
        );
    }

    pub fn summary(&self, totals: &RunTotals) {
        let mut payload = serde_json::to_value(totals).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut payload {
            map.insert(
                "message".to_string(),
                Value::String(format!(
                    "{} files: {} accepted, {} rejected, {} unchanged, {} errored, {} canceled",
                    totals.files, totals.accepted, totals.rejected, totals.unchanged, totals.errored, totals.canceled
                )),
            );
        }
        self.emit("run", EventType::Summary, payload);
    }
}
