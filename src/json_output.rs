//! JSON report format for detection runs

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::stats::EngineStats;
use crate::verdict::DetectionRecord;

/// Aggregate figures for one replay or observation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonSummary {
    pub total_detections: usize,
    /// Distinct caller domains among the detections
    pub unique_domains: usize,
    /// Entries retained in the global event log at report time
    pub total_events: usize,
    pub read_operations: usize,
    pub write_operations: usize,
    pub surfaces: usize,
    pub detections_suppressed: u64,
    pub rejected_events: u64,
}

/// Root JSON report structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    /// Format version identifier
    pub version: String,
    /// Format name
    pub format: String,
    /// Timestamp of the last observed event, in milliseconds
    pub generated_at_ms: i64,
    pub summary: JsonSummary,
    pub detections: Vec<DetectionRecord>,
}

impl JsonReport {
    /// Assemble a report from an engine snapshot and the run's detections
    pub fn build(
        stats: &EngineStats,
        detections: Vec<DetectionRecord>,
        generated_at_ms: i64,
    ) -> Self {
        let unique_domains = detections
            .iter()
            .map(|d| d.domain.as_str())
            .collect::<HashSet<_>>()
            .len();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "huella-report".to_string(),
            generated_at_ms,
            summary: JsonSummary {
                total_detections: detections.len(),
                unique_domains,
                total_events: stats.total_events,
                read_operations: stats.read_operations,
                write_operations: stats.write_operations,
                surfaces: stats.surfaces,
                detections_suppressed: stats.detections_suppressed,
                rejected_events: stats.rejected_events,
            },
            detections,
        }
    }
}
