//! Engine configuration
//!
//! Every tunable is independently overridable; unspecified options keep
//! their defaults. Config files are TOML and deserialize through the same
//! structs the engine consumes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::ClassifierConfig;
use crate::event_log::DEFAULT_RETENTION_MS;
use crate::origin_filter::OriginFilter;
use crate::thresholds::ThresholdConfig;
use crate::verdict::DEFAULT_DEDUP_WINDOW_MS;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid trusted-origin pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Master switch; a disabled engine records nothing
    pub enabled: bool,
    /// Global event log retention horizon
    pub retention_ms: i64,
    /// Window collapsing repeated (url, method) detections
    pub dedup_window_ms: i64,
    /// Surfaces below this pixel area are too small to be identifying
    pub min_surface_area: u64,
    /// Write-to-read latency bound for the inline rule check
    pub rule_timing_ms: i64,
    /// Regex patterns for caller URLs that never raise detections
    pub trusted_origins: Vec<String>,
    pub thresholds: ThresholdConfig,
    pub classifier: ClassifierConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_ms: DEFAULT_RETENTION_MS,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            min_surface_area: 256,
            rule_timing_ms: 100,
            trusted_origins: Vec::new(),
            thresholds: ThresholdConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; absent keys keep their defaults
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Compile the trusted-origin patterns
    pub fn build_origin_filter(&self) -> Result<OriginFilter, ConfigError> {
        Ok(OriginFilter::from_patterns(&self.trusted_origins)?)
    }
}
