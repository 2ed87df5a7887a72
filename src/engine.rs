//! The detection engine: single entry point tying ledger, thresholds,
//! classifier, and verdict pipeline together
//!
//! Every `record()` call synchronously appends to the surface ledger,
//! projects into the global event log, evaluates thresholds, and (for reads)
//! runs the inline rule check. There is no background scheduler; evaluation
//! is cheap relative to call volume and must not lag behind real operations.
//!
//! The engine never reads a wall clock: "now" is the largest event timestamp
//! observed, which keeps every computation deterministic under replay.
//!
//! # Example
//!
//! ```
//! use huella::engine::DetectionEngine;
//! use huella::event::OperationEvent;
//! use huella::ledger::{SurfaceId, SurfaceMeta};
//!
//! let mut engine = DetectionEngine::default();
//! let surface = SurfaceId(1);
//! engine.update_surface(surface, SurfaceMeta::new(256, 256));
//!
//! let url = "https://site.example/fp.js";
//! engine
//!     .record(surface, OperationEvent::write("fillText", "Cwm fjordbank glyphs vext quiz", 0, url))
//!     .unwrap();
//! let detection = engine
//!     .record(surface, OperationEvent::read("toDataURL", 50, url))
//!     .unwrap();
//! assert!(detection.is_some());
//! ```

use fnv::FnvHashMap;

use crate::classifier::{Prediction, SignatureClassifier};
use crate::config::{ConfigError, EngineConfig};
use crate::event::{EngineError, EventClass, OpKind, OperationEvent};
use crate::event_log::LogEntry;
use crate::ledger::{SurfaceId, SurfaceLedger, SurfaceMeta, SurfaceState};
use crate::stats::EngineStats;
use crate::thresholds::{ThresholdAnalyzer, ThresholdReport};
use crate::verdict::{DetectionRecord, DetectionSource, VerdictEngine};

/// Seam between host-specific interception adapters and the engine
///
/// Each host environment patches its own graphics API and forwards one event
/// per captured call through this interface; adapters stay generic over the
/// sink they deliver into.
pub trait EventSink {
    /// Deliver one captured operation for a surface
    fn emit(
        &mut self,
        surface: SurfaceId,
        event: OperationEvent,
    ) -> Result<Option<DetectionRecord>, EngineError>;
}

/// Behavioral canvas-fingerprinting detection engine
///
/// Owns all mutable state (surface ledgers and the global event log); no
/// external mutation is permitted except through its public operations.
#[derive(Debug)]
pub struct DetectionEngine {
    config: EngineConfig,
    enabled: bool,
    surfaces: FnvHashMap<SurfaceId, SurfaceLedger>,
    analyzer: ThresholdAnalyzer,
    classifier: SignatureClassifier,
    verdicts: VerdictEngine,
    /// Largest event timestamp observed so far
    now_ms: i64,
    rejected: u64,
}

impl Default for DetectionEngine {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self {
            enabled: config.enabled,
            surfaces: FnvHashMap::default(),
            analyzer: ThresholdAnalyzer::new(config.thresholds.clone(), config.retention_ms),
            classifier: SignatureClassifier::new(config.classifier.clone()),
            verdicts: VerdictEngine::default(),
            config,
            now_ms: 0,
            rejected: 0,
        }
    }
}

impl DetectionEngine {
    /// Build an engine from a configuration
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let mut engine = Self::default();
        engine.configure(config)?;
        Ok(engine)
    }

    /// Replace the engine's tunables; ledgers and counters are preserved
    pub fn configure(&mut self, config: EngineConfig) -> Result<(), ConfigError> {
        let filter = config.build_origin_filter()?;
        self.enabled = config.enabled;
        self.analyzer.set_config(config.thresholds.clone());
        self.analyzer.set_retention(config.retention_ms);
        self.classifier.set_config(config.classifier.clone());
        self.verdicts.set_dedup_window(config.dedup_window_ms);
        self.verdicts.set_origin_filter(filter);
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a callback invoked with each non-suppressed detection
    ///
    /// Dispatch is synchronous and ordered; listeners must be non-blocking.
    pub fn on_detection<F>(&mut self, listener: F)
    where
        F: Fn(&DetectionRecord) + 'static,
    {
        self.verdicts.add_listener(Box::new(listener));
    }

    /// Register a callback for `threshold_exceeded` signals
    ///
    /// Fired once per false-to-true transition of the aggregate flag.
    /// Exceedance is scrutiny context, not a detection by itself.
    pub fn on_threshold_exceeded<F>(&mut self, listener: F)
    where
        F: Fn(&ThresholdReport) + 'static,
    {
        self.verdicts.add_threshold_listener(Box::new(listener));
    }

    /// Record one intercepted operation
    ///
    /// Validates the event, appends it to the surface's ledger, projects it
    /// into the global log, evaluates thresholds, and runs the inline rule
    /// check when the operation is a read. Returns the detection emitted by
    /// this call, if any.
    pub fn record(
        &mut self,
        surface: SurfaceId,
        event: OperationEvent,
    ) -> Result<Option<DetectionRecord>, EngineError> {
        if let Err(err) = event.validate() {
            self.rejected += 1;
            tracing::debug!(surface = %surface, %err, "event rejected");
            return Err(err);
        }
        if !self.enabled {
            return Ok(None);
        }

        self.now_ms = self.now_ms.max(event.timestamp_ms);
        let now = self.now_ms;

        tracing::debug!(
            surface = %surface,
            operation = %event.operation,
            kind = ?event.kind,
            "canvas operation recorded"
        );

        let threshold_report = self
            .analyzer
            .record_and_evaluate(LogEntry::from_event(&event), now);

        let is_read = event.kind == OpKind::Read;
        let method = event.operation.clone();
        let caller_url = event.caller_url.clone();

        self.surfaces.entry(surface).or_default().record(event);

        if let Some(report) = threshold_report {
            self.verdicts.note_threshold_exceeded(&report);
        }

        let emitted = if is_read {
            self.rule_check(surface, &method, &caller_url, now)
        } else {
            None
        };
        Ok(emitted)
    }

    /// Update the known dimensions of a surface
    pub fn update_surface(&mut self, surface: SurfaceId, meta: SurfaceMeta) {
        self.surfaces.entry(surface).or_default().set_meta(meta);
    }

    /// Drop a surface's ledger when the embedding discards the surface
    pub fn remove_surface(&mut self, surface: SurfaceId) -> bool {
        self.surfaces.remove(&surface).is_some()
    }

    /// Classifier verdict for a surface without raising a detection
    pub fn predict(&self, surface: SurfaceId) -> Prediction {
        match self.surfaces.get(&surface) {
            Some(ledger) => self.classifier.predict(ledger.meta(), ledger),
            None => Prediction::not_assessable(),
        }
    }

    /// Run classifier-based scoring and raise a detection past the cutoff
    ///
    /// This is the explicit scoring path: the classifier only contributes a
    /// detection when a caller asks for it.
    pub fn score_surface(&mut self, surface: SurfaceId) -> Option<DetectionRecord> {
        let (score, method, caller_url) = {
            let ledger = self.surfaces.get(&surface)?;
            let prediction = self.classifier.predict(ledger.meta(), ledger);
            if !prediction.is_fingerprinting {
                return None;
            }
            // assessable implies at least one read
            let last_read = ledger.reads().last()?;
            (
                prediction.score,
                last_read.operation.clone(),
                last_read.caller_url.clone(),
            )
        };

        let record = DetectionRecord::new(
            surface,
            method,
            DetectionSource::Classifier,
            score,
            caller_url,
            self.now_ms,
        );
        self.submit_for_surface(surface, record)
    }

    /// Current scoring state of a surface
    pub fn surface_state(&self, surface: SurfaceId) -> SurfaceState {
        self.surfaces
            .get(&surface)
            .map(SurfaceLedger::state)
            .unwrap_or_default()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Surfaces currently holding a ledger
    pub fn surface_ids(&self) -> Vec<SurfaceId> {
        let mut ids: Vec<SurfaceId> = self.surfaces.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Diagnostic snapshot; read-only, no side effects
    pub fn stats(&self) -> EngineStats {
        let log = self.analyzer.log();
        EngineStats {
            total_events: log.len(),
            read_operations: log.count_class(EventClass::CanvasRead),
            write_operations: log.count_class(EventClass::CanvasWrite),
            suspicious_operations: self.analyzer.suspicious_ops_count(self.now_ms),
            surfaces: self.surfaces.len(),
            detections_emitted: self.verdicts.emitted(),
            detections_suppressed: self.verdicts.suppressed(),
            listener_failures: self.verdicts.listener_failures(),
            rejected_events: self.rejected,
            thresholds: self.analyzer.evaluate(self.now_ms),
        }
    }

    /// Inline rule check, evaluated at the moment a read is intercepted
    ///
    /// Requires both a write and a read; exempts surfaces below the area
    /// gate; raises on a known probe text or a write-to-read gap under the
    /// timing bound. The rule path fires independently of the classifier;
    /// the classifier score and any currently exceeded threshold signals are
    /// attached to the record as fusion context.
    fn rule_check(
        &mut self,
        surface: SurfaceId,
        method: &str,
        caller_url: &str,
        now_ms: i64,
    ) -> Option<DetectionRecord> {
        let score = {
            let ledger = self.surfaces.get(&surface)?;
            if ledger.writes().is_empty() || ledger.reads().is_empty() {
                return None;
            }
            if ledger.meta().area() < self.config.min_surface_area {
                return None;
            }
            let has_pattern = self.classifier.has_probe_text(ledger);
            let fast_readback = ledger
                .min_write_read_gap_ms()
                .is_some_and(|gap| gap < self.config.rule_timing_ms);
            if !(has_pattern || fast_readback) {
                return None;
            }
            self.classifier.predict(ledger.meta(), ledger).score
        };

        let mut record = DetectionRecord::new(
            surface,
            method,
            DetectionSource::RuleMatch,
            score,
            caller_url,
            now_ms,
        );
        let thresholds = self.analyzer.evaluate(now_ms);
        if thresholds.any_exceeded {
            record = record.with_metadata(
                "thresholds_exceeded",
                thresholds.exceeded_signals().join(","),
            );
        }
        self.submit_for_surface(surface, record)
    }

    /// Submit a record and reflect the outcome in the surface's state
    fn submit_for_surface(
        &mut self,
        surface: SurfaceId,
        record: DetectionRecord,
    ) -> Option<DetectionRecord> {
        let delivered = self.verdicts.submit(record);
        if let Some(ledger) = self.surfaces.get_mut(&surface) {
            if delivered.is_some() {
                ledger.mark_scored();
            } else {
                ledger.mark_suppressed();
            }
        }
        delivered
    }
}

impl EventSink for DetectionEngine {
    fn emit(
        &mut self,
        surface: SurfaceId,
        event: OperationEvent,
    ) -> Result<Option<DetectionRecord>, EngineError> {
        self.record(surface, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::OperationEvent;

    const URL: &str = "https://site.example/fp.js";

    fn write(text: &str, ts: i64) -> OperationEvent {
        OperationEvent::write("fillText", text, ts, URL)
    }

    fn read(op: &str, ts: i64) -> OperationEvent {
        OperationEvent::read(op, ts, URL)
    }

    #[test]
    fn test_invalid_event_is_rejected_and_not_counted() {
        let mut engine = DetectionEngine::default();
        let err = engine
            .record(SurfaceId(1), read("toDataURL", -5))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidEvent { .. }));
        assert_eq!(engine.stats().total_events, 0);
        assert_eq!(engine.stats().rejected_events, 1);
    }

    #[test]
    fn test_disabled_engine_records_nothing() {
        let mut engine = DetectionEngine::default();
        engine.set_enabled(false);
        let result = engine.record(SurfaceId(1), write("Cwm fjordbank", 0)).unwrap();
        assert!(result.is_none());
        assert_eq!(engine.stats().total_events, 0);
        assert_eq!(engine.surface_state(SurfaceId(1)), SurfaceState::Unobserved);
    }

    #[test]
    fn test_rule_detection_on_probe_text() {
        let mut engine = DetectionEngine::default();
        let surface = SurfaceId(7);
        engine.update_surface(surface, SurfaceMeta::new(256, 256));

        engine
            .record(surface, write("Cwm fjordbank glyphs vext quiz", 0))
            .unwrap();
        let detection = engine.record(surface, read("toDataURL", 50)).unwrap();

        let record = detection.expect("rule check should raise");
        assert_eq!(record.method, "toDataURL");
        assert_eq!(record.source, DetectionSource::RuleMatch);
        assert_eq!(record.surface, surface);
        assert_eq!(record.domain, "site.example");
        assert_eq!(engine.surface_state(surface), SurfaceState::Scored);
    }

    #[test]
    fn test_small_surface_is_exempt_from_rule_check() {
        let mut engine = DetectionEngine::default();
        let surface = SurfaceId(7);
        engine.update_surface(surface, SurfaceMeta::new(8, 8));

        engine
            .record(surface, write("Cwm fjordbank glyphs vext quiz", 0))
            .unwrap();
        let detection = engine.record(surface, read("toDataURL", 50)).unwrap();
        assert!(detection.is_none());
        assert_eq!(engine.surface_state(surface), SurfaceState::ReadAfterWrite);
    }

    #[test]
    fn test_unknown_metadata_fails_area_gate() {
        // the embedding never reported dimensions: fail open, no detection
        let mut engine = DetectionEngine::default();
        let surface = SurfaceId(7);
        engine.record(surface, write("Cwm fjordbank", 0)).unwrap();
        let detection = engine.record(surface, read("toDataURL", 50)).unwrap();
        assert!(detection.is_none());
    }

    #[test]
    fn test_fast_readback_raises_without_probe_text() {
        let mut engine = DetectionEngine::default();
        let surface = SurfaceId(3);
        engine.update_surface(surface, SurfaceMeta::new(400, 200));

        engine.record(surface, write("just pixels", 0)).unwrap();
        let detection = engine.record(surface, read("getImageData", 40)).unwrap();
        assert!(detection.is_some());
    }

    #[test]
    fn test_slow_readback_without_probe_text_is_benign() {
        let mut engine = DetectionEngine::default();
        let surface = SurfaceId(3);
        engine.update_surface(surface, SurfaceMeta::new(400, 200));

        engine.record(surface, write("just pixels", 0)).unwrap();
        let detection = engine.record(surface, read("toDataURL", 5_000)).unwrap();
        assert!(detection.is_none());
    }

    #[test]
    fn test_threshold_transition_notifies_threshold_listeners() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut engine = DetectionEngine::default();
        let signals = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&signals);
        engine.on_threshold_exceeded(move |report| {
            sink.borrow_mut().push(report.exceeded_signals().join(","));
        });

        // four suspicious reads across distinct surfaces inside the burst
        // window; none is individually assessable (no writes), so no
        // detection records are emitted
        for i in 0..4u64 {
            let result = engine
                .record(SurfaceId(i), read("getImageData", i as i64 * 1_000))
                .unwrap();
            assert!(result.is_none());
        }

        // the transition fires exactly once
        assert_eq!(signals.borrow().len(), 1);
        assert!(signals.borrow()[0].contains("suspicious_ops"));
        assert!(engine.stats().thresholds.any_exceeded);
        assert_eq!(engine.stats().detections_emitted, 0);
    }

    #[test]
    fn test_dedup_suppresses_repeat_and_marks_state() {
        let mut engine = DetectionEngine::default();
        let surface = SurfaceId(9);
        engine.update_surface(surface, SurfaceMeta::new(256, 256));

        engine.record(surface, write("AaBbCcDd", 1_000)).unwrap();
        let first = engine.record(surface, read("toDataURL", 1_000)).unwrap();
        assert!(first.is_some());

        // same gesture, second intercepted call 150 ms later
        let second = engine.record(surface, read("toDataURL", 1_150)).unwrap();
        assert!(second.is_none());
        // scored state survives the suppressed repeat
        assert_eq!(engine.surface_state(surface), SurfaceState::Scored);
        assert_eq!(engine.stats().detections_suppressed, 1);
    }

    #[test]
    fn test_score_surface_classifier_path() {
        // a 16x10 surface is exempt from the inline rule's area gate, but
        // suspicious width, fast readback, and operation volume still push
        // the classifier past the cutoff
        let mut engine = DetectionEngine::default();
        let surface = SurfaceId(4);
        engine.update_surface(surface, SurfaceMeta::new(16, 10));

        for i in 0..10 {
            engine.record(surface, write("glyph row", i)).unwrap();
        }
        let inline = engine.record(surface, read("getImageData", 50)).unwrap();
        assert!(inline.is_none());

        let record = engine.score_surface(surface).expect("classifier raise");
        assert_eq!(record.source, DetectionSource::Classifier);
        assert_eq!(record.method, "getImageData");
        assert!(record.score > 0.5);
        assert_eq!(engine.surface_state(surface), SurfaceState::Scored);
    }

    #[test]
    fn test_score_surface_below_cutoff_is_silent() {
        let mut engine = DetectionEngine::default();
        let surface = SurfaceId(4);
        engine.update_surface(surface, SurfaceMeta::new(40, 40));

        engine.record(surface, write("plain", 0)).unwrap();
        engine.record(surface, read("toBlob", 10_000)).unwrap();
        assert!(engine.score_surface(surface).is_none());
    }

    #[test]
    fn test_remove_surface_drops_ledger() {
        let mut engine = DetectionEngine::default();
        engine.record(SurfaceId(1), write("x", 0)).unwrap();
        assert!(engine.remove_surface(SurfaceId(1)));
        assert!(!engine.remove_surface(SurfaceId(1)));
        assert_eq!(engine.stats().surfaces, 0);
        // global log is unaffected by surface teardown
        assert_eq!(engine.stats().total_events, 1);
    }

    #[test]
    fn test_stats_counts_match_inserts() {
        let mut engine = DetectionEngine::default();
        engine.record(SurfaceId(1), write("a", 0)).unwrap();
        engine.record(SurfaceId(1), write("b", 10)).unwrap();
        engine.record(SurfaceId(2), read("toDataURL", 20)).unwrap();
        let _ = engine.record(SurfaceId(2), read("", 30));

        let stats = engine.stats();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.write_operations, 2);
        assert_eq!(stats.read_operations, 1);
        assert_eq!(stats.rejected_events, 1);
    }

    #[test]
    fn test_configure_updates_tunables_in_place() {
        let mut engine = DetectionEngine::default();
        let surface = SurfaceId(5);
        engine.update_surface(surface, SurfaceMeta::new(256, 256));
        engine.record(surface, write("Cwm fjordbank", 1_000)).unwrap();
        engine.record(surface, read("toDataURL", 1_000)).unwrap();

        let config = EngineConfig {
            dedup_window_ms: 1_000,
            ..EngineConfig::default()
        };
        engine.configure(config).unwrap();

        // 300 ms later: outside the default 200 ms window but inside the
        // reconfigured one
        let repeat = engine.record(surface, read("toDataURL", 1_300)).unwrap();
        assert!(repeat.is_none());
    }

    #[test]
    fn test_event_sink_delegates_to_record() {
        let mut engine = DetectionEngine::default();
        let surface = SurfaceId(6);
        engine.update_surface(surface, SurfaceMeta::new(256, 256));

        let sink: &mut dyn EventSink = &mut engine;
        sink.emit(surface, write("Cwm fjordbank", 0)).unwrap();
        let detection = sink.emit(surface, read("toDataURL", 50)).unwrap();
        assert!(detection.is_some());
    }

    #[test]
    fn test_listener_sees_every_emitted_detection() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut engine = DetectionEngine::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        engine.on_detection(move |record| sink.borrow_mut().push(record.method.clone()));

        let surface = SurfaceId(2);
        engine.update_surface(surface, SurfaceMeta::new(256, 256));
        engine.record(surface, write("Cwm fjordbank", 0)).unwrap();
        engine.record(surface, read("toDataURL", 50)).unwrap();

        assert_eq!(*seen.borrow(), vec!["toDataURL".to_string()]);
    }
}
