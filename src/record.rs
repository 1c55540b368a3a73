use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::Location;

pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Snapshot of a stack, buffered when the stack ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackRecord {
    #[serde(rename = "request_id")]
    pub id: String,
    #[serde(rename = "parent_request_id")]
    pub parent_id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "extra")]
    pub attributes: Attributes,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub file: String,
    pub line: u32,
    pub hostname: String,
}

/// A log event attributed to a stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub level: i32,
    #[serde(rename = "extra")]
    pub attributes: Attributes,
    pub message: String,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub file: String,
    pub line: u32,
}

/// Unit handed from producers to the dispatch loop.
#[derive(Debug, Clone)]
pub enum Event {
    Stack(StackRecord),
    Log(LogEvent),
}

/// Normalized log call as produced by a logging-framework adapter,
/// before it is attributed to a stack.
///
/// `level` is on the upstream scale (`ERROR=2` .. `TRACE=6`); the
/// configured offset is applied when the entry is fired.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: i32,
    pub fields: Attributes,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub file: String,
    pub line: u32,
}

impl LogEntry {
    /// Entry stamped with the current time and the caller's location.
    #[track_caller]
    pub fn new(level: i32, message: impl Into<String>) -> Self {
        let origin = Location::caller();
        Self {
            level,
            fields: Attributes::new(),
            message: message.into(),
            timestamp: Utc::now(),
            file: origin.file().to_string(),
            line: origin.line(),
        }
    }

    pub fn with_fields(mut self, fields: Attributes) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_origin(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = file.into();
        self.line = line;
        self
    }

    /// Attribute this entry to `request_id`.
    pub(crate) fn into_event(self, request_id: String, level_offset: i32) -> LogEvent {
        LogEvent {
            level: self.level + level_offset,
            attributes: self.fields,
            message: self.message.trim().to_string(),
            request_id,
            timestamp: self.timestamp,
            file: self.file,
            line: self.line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_captures_caller_and_trims_on_attribution() {
        let entry = LogEntry::new(4, "  hello \n");
        assert_eq!(entry.file, file!());
        assert_eq!(entry.line, line!() - 2);

        let event = entry.into_event("req-1".to_string(), 1);
        assert_eq!(event.level, 5);
        assert_eq!(event.message, "hello");
        assert_eq!(event.request_id, "req-1");
    }

    #[test]
    fn stack_record_uses_wire_field_names() {
        let record = StackRecord {
            id: "req-1".to_string(),
            parent_id: None,
            name: Some("checkout".to_string()),
            attributes: Attributes::new(),
            created_at: Utc::now(),
            file: "main.rs".to_string(),
            line: 7,
            hostname: "localhost".to_string(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["request_id"], "req-1");
        assert!(value["parent_request_id"].is_null());
        assert!(value["extra"].is_object());
        assert!(value["timestamp"].is_string());
    }
}
