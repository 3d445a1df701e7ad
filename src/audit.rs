//! Change events handed to the audit collaborator.
//!
//! The core only emits `(old, new)` pairs for every record a committed
//! transaction wrote; persisting or formatting history is someone else's job.

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::sync::Mutex;

/// Before/after snapshot of one record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    /// Record kind ("vlan", "ip", "dhcp", "dut", "labstation")
    pub kind: String,
    pub key: String,
    /// Absent for creations
    pub old: Option<serde_json::Value>,
    /// Absent for deletions
    pub new: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

/// What happened to the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

impl ChangeEvent {
    pub fn new(
        kind: &str,
        key: &str,
        old: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
    ) -> Self {
        Self {
            kind: kind.to_string(),
            key: key.to_string(),
            old,
            new,
            recorded_at: Utc::now(),
        }
    }

    pub fn action(&self) -> ChangeAction {
        match (&self.old, &self.new) {
            (None, _) => ChangeAction::Created,
            (Some(_), None) => ChangeAction::Deleted,
            (Some(_), Some(_)) => ChangeAction::Updated,
        }
    }
}

/// Receiver of committed changes
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &ChangeEvent);
}

/// Writes one log line per change
#[derive(Debug, Default)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: &ChangeEvent) {
        info!(
            "audit: {:?} {} {} at {}",
            event.action(),
            event.kind,
            event.key,
            event.recorded_at.to_rfc3339()
        );
    }
}

/// Keeps every event in memory, mostly for tests
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<ChangeEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Events recorded for one kind
    pub fn events_for(&self, kind: &str) -> Vec<ChangeEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == kind)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &ChangeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_action() {
        let created = ChangeEvent::new("dut", "D1", None, Some(json!({"hostname": "D1"})));
        assert_eq!(created.action(), ChangeAction::Created);

        let updated = ChangeEvent::new("dut", "D1", Some(json!({})), Some(json!({"a": 1})));
        assert_eq!(updated.action(), ChangeAction::Updated);

        let deleted = ChangeEvent::new("dut", "D1", Some(json!({})), None);
        assert_eq!(deleted.action(), ChangeAction::Deleted);
    }

    #[test]
    fn test_memory_sink_filters_by_kind() {
        let sink = MemoryAuditSink::new();
        sink.record(&ChangeEvent::new("ip", "v1/10.0.0.1", None, Some(json!({}))));
        sink.record(&ChangeEvent::new("dhcp", "vm-1", None, Some(json!({}))));
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.events_for("dhcp").len(), 1);
    }
}
