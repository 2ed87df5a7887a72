//! Per-surface operation ledgers and the surface scoring state machine

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::{OpKind, OperationEvent};

/// Opaque handle identifying one drawable surface for its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Current dimensions of a surface, supplied by the embedding
///
/// Absent metadata defaults to 0x0, which fails the area gate and every
/// size-based check: missing data suppresses detection rather than erroring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceMeta {
    pub width: u32,
    pub height: u32,
}

impl SurfaceMeta {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Scoring lifecycle of one surface
///
/// A fingerprint requires rendering content and then extracting it; surfaces
/// that only ever see writes (or only reads) never become assessable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceState {
    /// No write observed yet
    #[default]
    Unobserved,
    /// At least one write, no read after it
    WriteSeen,
    /// A read followed a write; the surface is assessable
    ReadAfterWrite,
    /// A detection was emitted for this surface
    Scored,
    /// A detection was raised but suppressed (dedup or trusted origin)
    Suppressed,
}

/// Ordered write/read history for one surface
#[derive(Debug, Default)]
pub struct SurfaceLedger {
    meta: SurfaceMeta,
    writes: Vec<OperationEvent>,
    reads: Vec<OperationEvent>,
    state: SurfaceState,
}

impl SurfaceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_meta(meta: SurfaceMeta) -> Self {
        Self {
            meta,
            ..Self::default()
        }
    }

    /// Append an event and advance the state machine
    pub fn record(&mut self, event: OperationEvent) {
        match event.kind {
            OpKind::Write => {
                self.writes.push(event);
                if self.state == SurfaceState::Unobserved {
                    self.state = SurfaceState::WriteSeen;
                }
            }
            OpKind::Read => {
                self.reads.push(event);
                if self.state == SurfaceState::WriteSeen {
                    self.state = SurfaceState::ReadAfterWrite;
                }
            }
        }
    }

    pub fn writes(&self) -> &[OperationEvent] {
        &self.writes
    }

    pub fn reads(&self) -> &[OperationEvent] {
        &self.reads
    }

    pub fn meta(&self) -> SurfaceMeta {
        self.meta
    }

    pub fn set_meta(&mut self, meta: SurfaceMeta) {
        self.meta = meta;
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    /// Mark the surface as having produced an emitted detection
    pub fn mark_scored(&mut self) {
        self.state = SurfaceState::Scored;
    }

    /// Mark a raised-but-suppressed detection; never downgrades `Scored`
    pub fn mark_suppressed(&mut self) {
        if self.state != SurfaceState::Scored {
            self.state = SurfaceState::Suppressed;
        }
    }

    pub fn total_ops(&self) -> usize {
        self.writes.len() + self.reads.len()
    }

    /// Smallest elapsed time from any write to any subsequent read
    ///
    /// Returns `None` when either sequence is empty or no read follows a
    /// write. Reads at the same millisecond as a write count as gap 0.
    pub fn min_write_read_gap_ms(&self) -> Option<i64> {
        let mut min_gap: Option<i64> = None;
        for read in &self.reads {
            for write in &self.writes {
                let gap = read.timestamp_ms - write.timestamp_ms;
                if gap >= 0 && min_gap.is_none_or(|m| gap < m) {
                    min_gap = Some(gap);
                }
            }
        }
        min_gap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::OperationEvent;

    fn write(ts: i64) -> OperationEvent {
        OperationEvent::write("fillText", "x", ts, "https://a.test")
    }

    fn read(ts: i64) -> OperationEvent {
        OperationEvent::read("toDataURL", ts, "https://a.test")
    }

    #[test]
    fn test_state_starts_unobserved() {
        let ledger = SurfaceLedger::new();
        assert_eq!(ledger.state(), SurfaceState::Unobserved);
    }

    #[test]
    fn test_write_then_read_reaches_read_after_write() {
        let mut ledger = SurfaceLedger::new();
        ledger.record(write(0));
        assert_eq!(ledger.state(), SurfaceState::WriteSeen);
        ledger.record(read(50));
        assert_eq!(ledger.state(), SurfaceState::ReadAfterWrite);
    }

    #[test]
    fn test_read_only_surface_stays_unobserved() {
        let mut ledger = SurfaceLedger::new();
        ledger.record(read(0));
        ledger.record(read(10));
        assert_eq!(ledger.state(), SurfaceState::Unobserved);
    }

    #[test]
    fn test_write_only_surface_stays_write_seen() {
        let mut ledger = SurfaceLedger::new();
        ledger.record(write(0));
        ledger.record(write(10));
        assert_eq!(ledger.state(), SurfaceState::WriteSeen);
    }

    #[test]
    fn test_mark_suppressed_never_downgrades_scored() {
        let mut ledger = SurfaceLedger::new();
        ledger.record(write(0));
        ledger.record(read(50));
        ledger.mark_scored();
        ledger.mark_suppressed();
        assert_eq!(ledger.state(), SurfaceState::Scored);
    }

    #[test]
    fn test_min_gap_over_pairs() {
        let mut ledger = SurfaceLedger::new();
        ledger.record(write(0));
        ledger.record(write(200));
        ledger.record(read(250));
        // closest pair is write@200 -> read@250
        assert_eq!(ledger.min_write_read_gap_ms(), Some(50));
    }

    #[test]
    fn test_min_gap_ignores_reads_before_writes() {
        let mut ledger = SurfaceLedger::new();
        ledger.record(read(10));
        ledger.record(write(100));
        assert_eq!(ledger.min_write_read_gap_ms(), None);

        ledger.record(read(400));
        assert_eq!(ledger.min_write_read_gap_ms(), Some(300));
    }

    #[test]
    fn test_min_gap_empty_sequences() {
        let ledger = SurfaceLedger::new();
        assert_eq!(ledger.min_write_read_gap_ms(), None);
    }

    #[test]
    fn test_area() {
        assert_eq!(SurfaceMeta::new(16, 16).area(), 256);
        assert_eq!(SurfaceMeta::new(8, 8).area(), 64);
        assert_eq!(SurfaceMeta::default().area(), 0);
    }
}
