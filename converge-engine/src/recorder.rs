//! Audit events attached to managed objects.
//!
//! Recording is informational only: it never blocks on I/O and never fails,
//! so it cannot interfere with reconciliation.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::ObjectKey;

/// Default number of events kept by [`EventLog`].
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
}

/// A recorded event.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub object: ObjectKey,
    pub severity: Severity,
    pub reason: String,
    pub message: String,
}

/// Sink for per-object audit events.
pub trait EventRecorder: Send + Sync {
    fn record(&self, kind: &str, key: &ObjectKey, severity: Severity, reason: &str, message: &str);
}

/// Event recorder that logs through `tracing` and keeps the most recent
/// events in memory.
pub struct EventLog {
    entries: Mutex<VecDeque<RecordedEvent>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Recorded events, oldest first, optionally filtered by object.
    pub fn events(&self, object: Option<&ObjectKey>) -> Vec<RecordedEvent> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter(|e| object.is_none_or(|key| &e.object == key))
            .cloned()
            .collect()
    }

    /// Recorded events for one object with the given reason.
    pub fn events_with_reason(&self, object: &ObjectKey, reason: &str) -> Vec<RecordedEvent> {
        self.events(Some(object))
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl EventRecorder for EventLog {
    fn record(&self, kind: &str, key: &ObjectKey, severity: Severity, reason: &str, message: &str) {
        match severity {
            Severity::Info => {
                tracing::info!(target: "audit", kind = %kind, object = %key, reason = %reason, "{}", message)
            }
            Severity::Warning => {
                tracing::warn!(target: "audit", kind = %kind, object = %key, reason = %reason, "{}", message)
            }
        }

        if self.capacity == 0 {
            return;
        }

        let event = RecordedEvent {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            object: key.clone(),
            severity,
            reason: reason.to_string(),
            message: message.to_string(),
        };

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(event);
    }
}
