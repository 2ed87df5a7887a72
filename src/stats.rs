//! Read-only diagnostic snapshot of the engine

use serde::Serialize;

use crate::thresholds::ThresholdReport;

/// Aggregate counters plus the current threshold-check results
///
/// A snapshot has no side effects; counts cover the retained portion of the
/// global event log.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// Entries currently retained in the global event log
    pub total_events: usize,
    pub read_operations: usize,
    pub write_operations: usize,
    /// Suspicious operations inside the burst window
    pub suspicious_operations: usize,
    /// Surfaces with a live ledger
    pub surfaces: usize,
    pub detections_emitted: u64,
    pub detections_suppressed: u64,
    pub listener_failures: u64,
    /// Events rejected as invalid since engine construction
    pub rejected_events: u64,
    pub thresholds: ThresholdReport,
}
