//! Feature-based signature classifier for captured read/write sequences
//!
//! A fixed, explainable linear model: four boolean features, each with a
//! tunable weight, normalized to a score in [0, 1]. Deterministic and
//! reproducible for identical inputs; weights are hot-swappable
//! configuration, not trained parameters.

use serde::{Deserialize, Serialize};

use crate::ledger::{SurfaceLedger, SurfaceMeta};

/// Text probes drawn by known canvas-fingerprinting scripts
///
/// Pangram fragments, glyph-width probes, and the emoji probe several
/// commercial fingerprinters render for Unicode rasterization differences.
pub const PROBE_STRINGS: [&str; 8] = [
    "Cwm fjordbank",
    "vext quiz",
    "AaBbCcDd",
    "mmmmmmmmlli",
    "Sphinx of black quartz",
    "The quick brown fox",
    "!@#$%^&*()",
    "\u{1F603}",
];

/// Canvas dimensions commonly chosen by fingerprint scripts
pub const SUSPICIOUS_SIZES: [u32; 4] = [16, 256, 300, 500];

/// Per-feature weights for the linear model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierWeights {
    pub text_pattern: f64,
    pub size: f64,
    pub timing: f64,
    pub operation_count: f64,
}

impl Default for ClassifierWeights {
    fn default() -> Self {
        Self {
            text_pattern: 0.7,
            size: 0.3,
            timing: 0.6,
            operation_count: 0.5,
        }
    }
}

impl ClassifierWeights {
    fn total(&self) -> f64 {
        self.text_pattern + self.size + self.timing + self.operation_count
    }
}

/// Tunable inputs of the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Substrings matched against write payloads
    pub probe_strings: Vec<String>,
    /// Width/height values considered suspicious
    pub suspicious_sizes: Vec<u32>,
    /// Write-to-read gap below which timing is suspicious
    pub read_write_timing_ms: i64,
    /// Combined operation count above which volume is suspicious
    pub max_ops_count: usize,
    pub weights: ClassifierWeights,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            probe_strings: PROBE_STRINGS.iter().map(|s| s.to_string()).collect(),
            suspicious_sizes: SUSPICIOUS_SIZES.to_vec(),
            read_write_timing_ms: 100,
            max_ops_count: 10,
            weights: ClassifierWeights::default(),
        }
    }
}

/// Extracted features; always fully populated once extraction runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureVector {
    pub has_known_text_pattern: bool,
    pub has_suspicious_size: bool,
    pub has_small_time_between_read_write: bool,
    pub has_high_operation_count: bool,
}

/// Classifier verdict for one surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    /// Normalized weighted feature sum in [0, 1]
    pub score: f64,
    /// True when `score > 0.5`
    pub is_fingerprinting: bool,
    /// Absent when the surface was not assessable (empty writes or reads)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
}

impl Prediction {
    /// The short-circuit verdict for unassessable surfaces
    pub fn not_assessable() -> Self {
        Self {
            score: 0.0,
            is_fingerprinting: false,
            features: None,
        }
    }
}

/// Scores a surface's ledger against known fingerprinting signatures
#[derive(Debug, Clone, Default)]
pub struct SignatureClassifier {
    config: ClassifierConfig,
}

impl SignatureClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ClassifierConfig) {
        self.config = config;
    }

    /// True when any write payload contains a known probe string
    pub fn has_probe_text(&self, ledger: &SurfaceLedger) -> bool {
        ledger.writes().iter().any(|w| {
            w.text
                .as_deref()
                .is_some_and(|text| self.config.probe_strings.iter().any(|p| text.contains(p)))
        })
    }

    /// Compute the full feature vector for one surface
    pub fn extract_features(&self, meta: SurfaceMeta, ledger: &SurfaceLedger) -> FeatureVector {
        let has_known_text_pattern = self.has_probe_text(ledger);

        let has_suspicious_size = self.config.suspicious_sizes.contains(&meta.width)
            || self.config.suspicious_sizes.contains(&meta.height);

        let has_small_time_between_read_write = ledger
            .min_write_read_gap_ms()
            .is_some_and(|gap| gap < self.config.read_write_timing_ms);

        let has_high_operation_count = ledger.total_ops() > self.config.max_ops_count;

        FeatureVector {
            has_known_text_pattern,
            has_suspicious_size,
            has_small_time_between_read_write,
            has_high_operation_count,
        }
    }

    /// Score a surface; short-circuits when either sequence is empty
    ///
    /// A surface must exhibit both a write and a later read to be assessable.
    pub fn predict(&self, meta: SurfaceMeta, ledger: &SurfaceLedger) -> Prediction {
        if ledger.writes().is_empty() || ledger.reads().is_empty() {
            return Prediction::not_assessable();
        }

        let features = self.extract_features(meta, ledger);
        let weights = &self.config.weights;

        let mut score = 0.0;
        if features.has_known_text_pattern {
            score += weights.text_pattern;
        }
        if features.has_suspicious_size {
            score += weights.size;
        }
        if features.has_small_time_between_read_write {
            score += weights.timing;
        }
        if features.has_high_operation_count {
            score += weights.operation_count;
        }

        let total = weights.total();
        let score = if total > 0.0 { score / total } else { 0.0 };

        Prediction {
            score,
            is_fingerprinting: score > 0.5,
            features: Some(features),
        }
    }
}
