use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// A chat message as published by the server. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub author: String,
    #[serde(rename = "msg", alias = "text")]
    pub text: String,
    /// Unix timestamp in seconds.
    pub time: i64,
}

impl Message {
    /// Decode one element of a poll response.
    ///
    /// `author` and `msg` default to empty strings; `id` and `time` are required.
    pub fn from_value(value: Value) -> Result<Self, SyncError> {
        let Value::Object(fields) = value else {
            return Err(SyncError::MalformedMessage(format!("expected object, got {}", value)));
        };

        let id = fields
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| SyncError::MalformedMessage("missing or invalid id".to_string()))?;
        let time = fields
            .get("time")
            .and_then(Value::as_i64)
            .ok_or_else(|| SyncError::MalformedMessage(format!("message {}: missing or invalid time", id)))?;
        let text_field = |name: &str| fields.get(name).and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            id,
            author: text_field("author").unwrap_or_default(),
            text: text_field("msg").or_else(|| text_field("text")).unwrap_or_default(),
            time,
        })
    }

    /// Relative age label, e.g. `"12s ago"`. Saturates on out-of-range server times.
    pub fn age_label(&self, now: i64) -> String {
        format!("{}s ago", now.saturating_sub(self.time))
    }

    /// One history line: `author: text 12s ago`.
    pub fn display_line(&self, now: i64) -> String {
        format!("{}: {} {}", self.author, self.text, self.age_label(now))
    }
}

/// A message about to be posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    #[serde(rename = "msg")]
    pub text: String,
    pub author: String,
}

impl OutgoingMessage {
    /// Trim user input. Returns `None` for blank text; a blank author becomes `default_author`.
    pub fn new(text: &str, author: &str, default_author: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let author = match author.trim() {
            "" => default_author.trim(),
            author => author,
        };
        Some(Self {
            text: text.to_string(),
            author: author.to_string(),
        })
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
