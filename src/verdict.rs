//! Detection records, deduplication, and listener dispatch
//!
//! Every signal source converges here. A raised detection survives the
//! trusted-origin allowlist and the dedup window before it is dispatched, in
//! registration order, to every listener. A panicking listener is isolated:
//! logged, counted, and skipped over.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::ledger::SurfaceId;
use crate::origin_filter::OriginFilter;
use crate::thresholds::ThresholdReport;

/// Default dedup window: one user gesture can trigger several intercepted
/// calls representing the same logical attempt
pub const DEFAULT_DEDUP_WINDOW_MS: i64 = 200;

/// Which analysis path raised the detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionSource {
    /// Inline rule check at the moment of a read
    RuleMatch,
    /// Explicit signature-classifier scoring
    Classifier,
}

impl std::fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DetectionSource::RuleMatch => "rule-match",
            DetectionSource::Classifier => "classifier",
        };
        f.pad(label)
    }
}

/// One non-suppressed fingerprinting detection
///
/// Immutable once emitted; ownership transfers to whichever collaborator
/// persists or exports it. Embedding-specific extras travel in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub surface: SurfaceId,
    /// The check or operation that triggered it (e.g. "toDataURL")
    pub method: String,
    pub source: DetectionSource,
    /// Fingerprinting likelihood in [0, 1]
    pub score: f64,
    pub caller_url: String,
    /// Host portion of `caller_url`, empty when it has none
    pub domain: String,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl DetectionRecord {
    pub fn new(
        surface: SurfaceId,
        method: impl Into<String>,
        source: DetectionSource,
        score: f64,
        caller_url: impl Into<String>,
        timestamp_ms: i64,
    ) -> Self {
        let caller_url = caller_url.into();
        let domain = domain_of(&caller_url).to_string();
        Self {
            surface,
            method: method.into(),
            source,
            score,
            caller_url,
            domain,
            timestamp_ms,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach an embedding-specific metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Host portion of a URL: everything between `scheme://` and the first
/// `/`, `:`, `?` or `#`
pub fn domain_of(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => return "",
    };
    let end = rest
        .find(['/', ':', '?', '#'])
        .unwrap_or(rest.len());
    &rest[..end]
}

/// Callback invoked with each non-suppressed detection
pub type DetectionListener = Box<dyn Fn(&DetectionRecord)>;

/// Callback invoked when the threshold analyzer reports a new exceedance
pub type ThresholdListener = Box<dyn Fn(&ThresholdReport)>;

/// Fuses detection signals into dispatched records
pub struct VerdictEngine {
    dedup_window_ms: i64,
    /// Last emission time per (caller_url, method)
    recent: HashMap<(String, String), i64>,
    listeners: Vec<DetectionListener>,
    threshold_listeners: Vec<ThresholdListener>,
    origin_filter: OriginFilter,
    emitted: u64,
    suppressed: u64,
    threshold_signals: u64,
    listener_failures: u64,
}

impl std::fmt::Debug for VerdictEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictEngine")
            .field("dedup_window_ms", &self.dedup_window_ms)
            .field("listeners", &self.listeners.len())
            .field("emitted", &self.emitted)
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

impl Default for VerdictEngine {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW_MS, OriginFilter::empty())
    }
}

impl VerdictEngine {
    pub fn new(dedup_window_ms: i64, origin_filter: OriginFilter) -> Self {
        Self {
            dedup_window_ms,
            recent: HashMap::new(),
            listeners: Vec::new(),
            threshold_listeners: Vec::new(),
            origin_filter,
            emitted: 0,
            suppressed: 0,
            threshold_signals: 0,
            listener_failures: 0,
        }
    }

    pub fn add_listener(&mut self, listener: DetectionListener) {
        self.listeners.push(listener);
    }

    pub fn add_threshold_listener(&mut self, listener: ThresholdListener) {
        self.threshold_listeners.push(listener);
    }

    pub fn set_dedup_window(&mut self, dedup_window_ms: i64) {
        self.dedup_window_ms = dedup_window_ms;
    }

    pub fn set_origin_filter(&mut self, filter: OriginFilter) {
        self.origin_filter = filter;
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn threshold_signals(&self) -> u64 {
        self.threshold_signals
    }

    pub fn listener_failures(&self) -> u64 {
        self.listener_failures
    }

    /// Receive a `threshold_exceeded` signal from the analyzer
    ///
    /// Threshold exceedance is context, not a detection by itself; it is
    /// fanned out to its own listeners with the same failure isolation.
    pub fn note_threshold_exceeded(&mut self, report: &ThresholdReport) {
        self.threshold_signals += 1;
        tracing::info!(
            signals = ?report.exceeded_signals(),
            "behavior thresholds exceeded"
        );
        for (index, listener) in self.threshold_listeners.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(report)));
            if outcome.is_err() {
                self.listener_failures += 1;
                tracing::warn!(listener = index, "threshold listener panicked; continuing");
            }
        }
    }

    /// Run a raised detection through allowlist and dedup, then dispatch
    ///
    /// Returns the record when it was delivered, `None` when suppressed.
    pub fn submit(&mut self, record: DetectionRecord) -> Option<DetectionRecord> {
        if self.origin_filter.is_trusted(&record.caller_url) {
            tracing::debug!(url = %record.caller_url, "detection from trusted origin suppressed");
            self.suppressed += 1;
            return None;
        }

        let key = (record.caller_url.clone(), record.method.clone());
        if let Some(&last) = self.recent.get(&key) {
            if record.timestamp_ms - last < self.dedup_window_ms {
                tracing::debug!(
                    url = %record.caller_url,
                    method = %record.method,
                    "duplicate detection inside dedup window suppressed"
                );
                self.suppressed += 1;
                return None;
            }
        }
        self.recent.insert(key, record.timestamp_ms);
        self.prune_recent(record.timestamp_ms);

        tracing::info!(
            url = %record.caller_url,
            method = %record.method,
            score = record.score,
            "canvas fingerprinting detected"
        );
        self.emitted += 1;
        self.dispatch(&record);
        Some(record)
    }

    /// Deliver to every listener in registration order, isolating failures
    fn dispatch(&mut self, record: &DetectionRecord) {
        for (index, listener) in self.listeners.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(record)));
            if outcome.is_err() {
                self.listener_failures += 1;
                tracing::warn!(listener = index, "detection listener panicked; continuing");
            }
        }
    }

    /// Drop dedup entries that can no longer suppress anything
    fn prune_recent(&mut self, now_ms: i64) {
        let window = self.dedup_window_ms;
        self.recent.retain(|_, last| now_ms - *last < window);
    }
}
