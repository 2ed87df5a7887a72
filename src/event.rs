//! Canvas operation events and their coarse classification
//!
//! Events arrive pre-structured from an interception layer (one per observed
//! graphics call) and are immutable once recorded.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operations classified as text measurement (font enumeration probes)
pub const FONT_METRIC_OPERATIONS: [&str; 1] = ["measureText"];

/// Errors surfaced by the detection engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Event failed validation; it was dropped and not recorded
    #[error("invalid event: {reason}")]
    InvalidEvent { reason: String },
}

/// Direction of a canvas operation relative to the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Draws content onto the surface (fillText, strokeText, ...)
    Write,
    /// Extracts pixel content from the surface (toDataURL, getImageData, ...)
    Read,
}

/// Source position of the intercepted call, when stack inspection resolved one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerLocation {
    pub line: u32,
    pub column: u32,
}

/// A single intercepted canvas operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEvent {
    /// Read or write direction
    pub kind: OpKind,
    /// API method name (e.g. "fillText", "getImageData", "toDataURL")
    pub operation: String,
    /// Payload drawn, for write operations that carry text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Milliseconds since epoch, as reported by the interception layer
    pub timestamp_ms: i64,
    /// URL of the script that issued the call
    pub caller_url: String,
    /// Line/column of the call site, if resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_location: Option<CallerLocation>,
}

impl OperationEvent {
    /// Build a write event carrying drawn text
    pub fn write(
        operation: impl Into<String>,
        text: impl Into<String>,
        timestamp_ms: i64,
        caller_url: impl Into<String>,
    ) -> Self {
        Self {
            kind: OpKind::Write,
            operation: operation.into(),
            text: Some(text.into()),
            timestamp_ms,
            caller_url: caller_url.into(),
            caller_location: None,
        }
    }

    /// Build a read event
    pub fn read(
        operation: impl Into<String>,
        timestamp_ms: i64,
        caller_url: impl Into<String>,
    ) -> Self {
        Self {
            kind: OpKind::Read,
            operation: operation.into(),
            text: None,
            timestamp_ms,
            caller_url: caller_url.into(),
            caller_location: None,
        }
    }

    /// Validate required fields; failures reject the event before recording
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.timestamp_ms < 0 {
            return Err(EngineError::InvalidEvent {
                reason: format!("negative timestamp {}", self.timestamp_ms),
            });
        }
        if self.operation.is_empty() {
            return Err(EngineError::InvalidEvent {
                reason: "empty operation name".to_string(),
            });
        }
        Ok(())
    }

    /// True when this operation is a text-measurement (font metrics) call
    pub fn is_font_metrics(&self) -> bool {
        FONT_METRIC_OPERATIONS.contains(&self.operation.as_str())
    }
}

/// Coarse tag a recorded event projects to in the global log
///
/// Every event counts as `CanvasCall`; its kind adds `CanvasRead` or
/// `CanvasWrite`; text-measurement operations additionally count as
/// `FontMetrics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventClass {
    CanvasCall,
    CanvasRead,
    CanvasWrite,
    FontMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_event_carries_text() {
        let event = OperationEvent::write("fillText", "probe", 100, "https://a.test");
        assert_eq!(event.kind, OpKind::Write);
        assert_eq!(event.text.as_deref(), Some("probe"));
        assert_eq!(event.timestamp_ms, 100);
    }

    #[test]
    fn test_read_event_has_no_text() {
        let event = OperationEvent::read("toDataURL", 100, "https://a.test");
        assert_eq!(event.kind, OpKind::Read);
        assert!(event.text.is_none());
    }

    #[test]
    fn test_validate_accepts_well_formed_event() {
        let event = OperationEvent::read("toDataURL", 0, "https://a.test");
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_timestamp() {
        let event = OperationEvent::read("toDataURL", -1, "https://a.test");
        let err = event.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidEvent { .. }));
    }

    #[test]
    fn test_validate_rejects_empty_operation() {
        let event = OperationEvent::read("", 100, "https://a.test");
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_font_metrics_classification() {
        let measure = OperationEvent::read("measureText", 100, "https://a.test");
        assert!(measure.is_font_metrics());

        let fill = OperationEvent::write("fillText", "x", 100, "https://a.test");
        assert!(!fill.is_font_metrics());
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let event = OperationEvent::write("fillText", "Cwm fjordbank", 42, "https://a.test");
        let json = serde_json::to_string(&event).unwrap();
        let back: OperationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
