//! Pipeline lifecycle events.
//!
//! Every sync stage emits an [`Event`] which the store appends to
//! `events.jsonl`. Events are immutable once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SyncStarted,
    SyncFinished,
    DocumentSkipped,
    ExtractionStarted,
    ExtractionSucceeded,
    ExtractionFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SyncStarted => "sync_started",
            EventType::SyncFinished => "sync_finished",
            EventType::DocumentSkipped => "document_skipped",
            EventType::ExtractionStarted => "extraction_started",
            EventType::ExtractionSucceeded => "extraction_succeeded",
            EventType::ExtractionFailed => "extraction_failed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            payload: Map::new(),
        }
    }

    /// Add one payload field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// String payload field, if present.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// One-line human rendering used by `amp events`.
    pub fn display_line(&self) -> String {
        let mut line = format!(
            "{}  {:<21}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.event_type.as_str()
        );
        for (key, value) in &self.payload {
            if key == "run_id" {
                continue;
            }
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            line.push_str(&format!(" {}={}", key, rendered));
        }
        line
    }
}
