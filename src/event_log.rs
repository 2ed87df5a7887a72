//! Append-only global event log with a sliding retention horizon
//!
//! The threshold analyzer owns one of these. Entries older than the retention
//! horizon are evicted from the front after each insertion; timestamps are
//! non-decreasing in insert order, so eviction is amortized O(1).

use std::collections::VecDeque;

use crate::event::{EventClass, OpKind, OperationEvent};

/// Default retention horizon: one minute of events
pub const DEFAULT_RETENTION_MS: i64 = 60_000;

/// One projected entry in the global log
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp_ms: i64,
    pub operation: String,
    pub kind: OpKind,
    pub font_metrics: bool,
}

impl LogEntry {
    /// Project a recorded operation event into its log entry
    pub fn from_event(event: &OperationEvent) -> Self {
        Self {
            timestamp_ms: event.timestamp_ms,
            operation: event.operation.clone(),
            kind: event.kind,
            font_metrics: event.is_font_metrics(),
        }
    }

    /// Whether this entry counts toward the given coarse class
    pub fn matches(&self, class: EventClass) -> bool {
        match class {
            EventClass::CanvasCall => true,
            EventClass::CanvasRead => self.kind == OpKind::Read,
            EventClass::CanvasWrite => self.kind == OpKind::Write,
            EventClass::FontMetrics => self.font_metrics,
        }
    }
}

/// Append-only log of recent canvas activity across all surfaces
#[derive(Debug)]
pub struct GlobalEventLog {
    entries: VecDeque<LogEntry>,
    retention_ms: i64,
}

impl Default for GlobalEventLog {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_MS)
    }
}

impl GlobalEventLog {
    pub fn new(retention_ms: i64) -> Self {
        Self {
            entries: VecDeque::new(),
            retention_ms,
        }
    }

    /// Append an entry, then evict everything past the retention horizon
    ///
    /// `now_ms` is the engine's current clock (the largest timestamp seen).
    pub fn push(&mut self, entry: LogEntry, now_ms: i64) {
        self.entries.push_back(entry);
        self.evict_expired(now_ms);
    }

    /// Drop entries strictly older than `now_ms - retention`
    ///
    /// Entries exactly at the horizon boundary are retained (closed interval).
    pub fn evict_expired(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.retention_ms;
        while let Some(front) = self.entries.front() {
            if front.timestamp_ms < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Count entries of a class inside a closed sliding window ending at `now_ms`
    pub fn count_in_window(&self, class: EventClass, now_ms: i64, window_ms: i64) -> usize {
        let window_start = now_ms - window_ms;
        self.entries
            .iter()
            .filter(|e| e.timestamp_ms >= window_start && e.matches(class))
            .count()
    }

    /// Count entries of a class over the whole retained log
    pub fn count_class(&self, class: EventClass) -> usize {
        self.entries.iter().filter(|e| e.matches(class)).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn retention_ms(&self) -> i64 {
        self.retention_ms
    }

    pub fn set_retention(&mut self, retention_ms: i64) {
        self.retention_ms = retention_ms;
    }

    /// Most recent entry, if any
    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    /// Iterate retained entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}
