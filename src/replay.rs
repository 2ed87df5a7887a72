//! Replay a JSONL operation trace through the detection engine
//!
//! One trace record per line: the target surface, optional current
//! dimensions, and the operation event itself. Replay drives the same
//! `record()` path a live interception layer would, so a captured trace
//! reproduces detections bit-for-bit.

use std::io::BufRead;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::DetectionEngine;
use crate::event::OperationEvent;
use crate::ledger::{SurfaceId, SurfaceMeta};
use crate::verdict::DetectionRecord;

/// One line of a JSONL operation trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Surface the operation targeted
    pub surface: u64,
    /// Current surface width, when the capture layer reported it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Current surface height, when the capture layer reported it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(flatten)]
    pub event: OperationEvent,
}

/// Errors raised while reading or parsing a trace
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("trace line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Counters and detections accumulated over one replay
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    pub events_replayed: usize,
    /// Events dropped as invalid; replay continues past them
    pub events_rejected: usize,
    pub detections: Vec<DetectionRecord>,
}

/// Parse one trace line
pub fn parse_line(line: &str) -> Result<TraceRecord, serde_json::Error> {
    serde_json::from_str(line)
}

/// Feed every trace line into the engine
///
/// Blank lines are skipped. A malformed JSON line aborts the replay with its
/// line number; an event the engine rejects as invalid is counted and
/// skipped, matching the engine's own fail-open posture.
pub fn replay<R: BufRead>(
    engine: &mut DetectionEngine,
    reader: R,
) -> Result<ReplayOutcome, ReplayError> {
    let mut outcome = ReplayOutcome::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record = parse_line(trimmed).map_err(|source| ReplayError::Parse {
            line: index + 1,
            source,
        })?;

        let surface = SurfaceId(record.surface);
        if let (Some(width), Some(height)) = (record.width, record.height) {
            engine.update_surface(surface, SurfaceMeta::new(width, height));
        }

        match engine.record(surface, record.event) {
            Ok(Some(detection)) => {
                outcome.events_replayed += 1;
                outcome.detections.push(detection);
            }
            Ok(None) => outcome.events_replayed += 1,
            Err(err) => {
                tracing::debug!(line = index + 1, %err, "trace event rejected");
                outcome.events_rejected += 1;
            }
        }
    }

    Ok(outcome)
}

/// Run classifier scoring over every surface the replay touched
pub fn classify_all(engine: &mut DetectionEngine) -> Vec<DetectionRecord> {
    engine
        .surface_ids()
        .into_iter()
        .filter_map(|surface| engine.score_surface(surface))
        .collect()
}
