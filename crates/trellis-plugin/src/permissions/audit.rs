//! Security audit trail for denied capability requests.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Capability;

/// A denied access attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Plugin that asked.
    pub plugin: String,
    /// Capability that was refused.
    pub capability: Capability,
    /// When the denial happened.
    pub at: DateTime<Utc>,
}

/// Destination for security events.
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Records one event.
    fn record(&self, event: SecurityEvent);
}

/// Bounded in-memory ring of the most recent security events.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    events: Mutex<VecDeque<SecurityEvent>>,
}

impl AuditLog {
    /// Creates a log keeping at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Snapshot of retained events, oldest first.
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Events recorded for `plugin`.
    pub fn events_for(&self, plugin: &str) -> Vec<SecurityEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.plugin == plugin)
            .collect()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether no events are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for AuditLog {
    fn record(&self, event: SecurityEvent) {
        if let Ok(mut events) = self.events.lock() {
            if events.len() >= self.capacity {
                events.pop_front();
            }
            events.push_back(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(plugin: &str) -> SecurityEvent {
        SecurityEvent {
            plugin: plugin.to_string(),
            capability: Capability::Network,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let log = AuditLog::new(2);
        log.record(event("a"));
        log.record(event("b"));
        log.record(event("c"));

        let plugins: Vec<String> = log.events().into_iter().map(|e| e.plugin).collect();
        assert_eq!(plugins, vec!["b", "c"]);
    }

    #[test]
    fn test_events_for_filters_by_plugin() {
        let log = AuditLog::new(8);
        log.record(event("a"));
        log.record(event("b"));
        log.record(event("a"));
        assert_eq!(log.events_for("a").len(), 2);
        assert_eq!(log.len(), 3);
    }
}
