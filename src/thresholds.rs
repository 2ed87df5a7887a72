//! Sliding-window threshold analysis over the global event log
//!
//! Four independently tunable signals, each with its own window and limit.
//! Aggregation is a deliberate OR: fingerprinting scripts vary widely in
//! which signal they trip, so any single exceeded signal warrants downstream
//! scrutiny.

use serde::{Deserialize, Serialize};

use crate::event::EventClass;
use crate::event_log::{GlobalEventLog, LogEntry, DEFAULT_RETENTION_MS};

/// Operations characteristic of canvas fingerprint probes
pub const SUSPICIOUS_OPERATIONS: [&str; 4] =
    ["fillText", "strokeText", "getImageData", "toDataURL"];

/// Window plus count limit for a frequency-based signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyThreshold {
    pub window_ms: i64,
    pub limit: usize,
}

impl Default for FrequencyThreshold {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            limit: 3,
        }
    }
}

/// Tunable limits for all four threshold signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Reads-per-write ratio over all retained events
    pub read_write_ratio: f64,
    /// Canvas call frequency: count of all calls in window
    pub canvas_calls: FrequencyThreshold,
    /// Font-metric frequency: count of text-measurement calls in window
    pub font_metrics: FrequencyThreshold,
    /// Burst of operations from `SUSPICIOUS_OPERATIONS` in window
    pub suspicious_ops: FrequencyThreshold,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            read_write_ratio: 0.8,
            canvas_calls: FrequencyThreshold {
                window_ms: 5_000,
                limit: 3,
            },
            font_metrics: FrequencyThreshold {
                window_ms: 10_000,
                limit: 5,
            },
            suspicious_ops: FrequencyThreshold {
                window_ms: 10_000,
                limit: 3,
            },
        }
    }
}

/// Result of one frequency check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrequencyCheck {
    pub count: usize,
    pub limit: usize,
    pub exceeded: bool,
}

/// Result of the read/write ratio check
///
/// Only evaluated when writes exist; with zero writes the check reports
/// not-exceeded and a ratio of 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatioCheck {
    pub ratio: f64,
    pub threshold: f64,
    pub exceeded: bool,
}

/// All four sub-results plus the OR-aggregate, stamped with evaluation time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdReport {
    pub canvas_calls: FrequencyCheck,
    pub font_metrics: FrequencyCheck,
    pub read_write_ratio: RatioCheck,
    pub suspicious_ops: FrequencyCheck,
    pub any_exceeded: bool,
    pub timestamp_ms: i64,
}

impl ThresholdReport {
    /// Names of the signals currently exceeded, for detection metadata
    pub fn exceeded_signals(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.canvas_calls.exceeded {
            out.push("canvas_calls");
        }
        if self.font_metrics.exceeded {
            out.push("font_metrics");
        }
        if self.read_write_ratio.exceeded {
            out.push("read_write_ratio");
        }
        if self.suspicious_ops.exceeded {
            out.push("suspicious_ops");
        }
        out
    }
}

/// Maintains the global event log and evaluates every signal after each insert
#[derive(Debug)]
pub struct ThresholdAnalyzer {
    config: ThresholdConfig,
    log: GlobalEventLog,
    last_any_exceeded: bool,
}

impl Default for ThresholdAnalyzer {
    fn default() -> Self {
        Self::new(ThresholdConfig::default(), DEFAULT_RETENTION_MS)
    }
}

impl ThresholdAnalyzer {
    pub fn new(config: ThresholdConfig, retention_ms: i64) -> Self {
        Self {
            config,
            log: GlobalEventLog::new(retention_ms),
            last_any_exceeded: false,
        }
    }

    pub fn log(&self) -> &GlobalEventLog {
        &self.log
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ThresholdConfig) {
        self.config = config;
    }

    pub fn set_retention(&mut self, retention_ms: i64) {
        self.log.set_retention(retention_ms);
    }

    /// Insert a projected entry, run the retention pass, and evaluate
    ///
    /// Returns `Some(report)` only when `any_exceeded` transitions from false
    /// to true, which is the moment a `threshold_exceeded` signal is raised
    /// toward the verdict engine.
    pub fn record_and_evaluate(&mut self, entry: LogEntry, now_ms: i64) -> Option<ThresholdReport> {
        self.log.push(entry, now_ms);
        let report = self.evaluate(now_ms);
        let newly_exceeded = report.any_exceeded && !self.last_any_exceeded;
        self.last_any_exceeded = report.any_exceeded;
        newly_exceeded.then_some(report)
    }

    /// Recompute all four checks against the current log
    pub fn evaluate(&self, now_ms: i64) -> ThresholdReport {
        let canvas_calls =
            self.frequency_check(EventClass::CanvasCall, self.config.canvas_calls, now_ms);
        let font_metrics =
            self.frequency_check(EventClass::FontMetrics, self.config.font_metrics, now_ms);
        let read_write_ratio = self.ratio_check();
        let suspicious_ops = self.suspicious_ops_check(now_ms);

        let any_exceeded = canvas_calls.exceeded
            || font_metrics.exceeded
            || read_write_ratio.exceeded
            || suspicious_ops.exceeded;

        ThresholdReport {
            canvas_calls,
            font_metrics,
            read_write_ratio,
            suspicious_ops,
            any_exceeded,
            timestamp_ms: now_ms,
        }
    }

    /// Count of suspicious operations in the burst window (for stats)
    pub fn suspicious_ops_count(&self, now_ms: i64) -> usize {
        self.suspicious_ops_check(now_ms).count
    }

    fn frequency_check(
        &self,
        class: EventClass,
        threshold: FrequencyThreshold,
        now_ms: i64,
    ) -> FrequencyCheck {
        let count = self.log.count_in_window(class, now_ms, threshold.window_ms);
        FrequencyCheck {
            count,
            limit: threshold.limit,
            exceeded: count > threshold.limit,
        }
    }

    fn ratio_check(&self) -> RatioCheck {
        let reads = self.log.count_class(EventClass::CanvasRead);
        let writes = self.log.count_class(EventClass::CanvasWrite);
        let threshold = self.config.read_write_ratio;

        if writes == 0 {
            return RatioCheck {
                ratio: 0.0,
                threshold,
                exceeded: false,
            };
        }

        let ratio = reads as f64 / writes as f64;
        RatioCheck {
            ratio,
            threshold,
            exceeded: ratio > threshold,
        }
    }

    fn suspicious_ops_check(&self, now_ms: i64) -> FrequencyCheck {
        let threshold = self.config.suspicious_ops;
        let window_start = now_ms - threshold.window_ms;
        let count = self
            .log
            .iter()
            .filter(|e| {
                e.timestamp_ms >= window_start
                    && SUSPICIOUS_OPERATIONS.contains(&e.operation.as_str())
            })
            .count();
        FrequencyCheck {
            count,
            limit: threshold.limit,
            exceeded: count > threshold.limit,
        }
    }
}
