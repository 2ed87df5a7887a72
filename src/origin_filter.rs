//! Trusted-origin allowlist
//!
//! Caller URLs matching any configured pattern never produce detections.
//! Patterns are regular expressions matched anywhere in the URL.

use regex::Regex;

/// Compiled allowlist of trusted caller-URL patterns
#[derive(Debug, Clone, Default)]
pub struct OriginFilter {
    patterns: Vec<Regex>,
}

impl OriginFilter {
    /// An empty filter trusts nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile a list of regex patterns
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// True when the URL matches any trusted pattern
    pub fn is_trusted(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(url))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }
}
