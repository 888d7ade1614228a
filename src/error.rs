//! # Error Types
//!
//! This module defines error types used throughout the labelfeed library.
//!
//! | Variant | Raised by | Recovery |
//! |---------|-----------|----------|
//! | `ConnectionLost` | serial reader | ingestion halts, operator is told |
//! | `Parse` | record parser | row logged, next fragment |
//! | `PrintFailed` | print backends | row logged with status, next record |
//! | `Audit` | audit log writer | surfaced, processing continues |
//! | `InvalidStateTransition` | mode controller | rejected, no side effect |

use std::fmt;

use thiserror::Error;

/// Main error type for labelfeed operations
#[derive(Debug, Error)]
pub enum LabelfeedError {
    /// The serial transport failed while reading
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A fragment could not be turned into a device record
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A print backend rejected or failed a job
    #[error("Print failed on {backend}: {detail}")]
    PrintFailed { backend: String, detail: String },

    /// Audit log or archive persistence failed
    #[error(transparent)]
    Audit(#[from] AuditFailure),

    /// Mode switch or start/stop requested in the wrong state
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Operator picked a tracking number that was already issued
    #[error("Tracking number {0} has already been issued")]
    TrackingCollision(u64),

    /// No queued item with this id
    #[error("Queue item {0} not found")]
    QueueItemNotFound(u64),

    /// Label template could not be loaded or rendered
    #[error("Template error: {0}")]
    Template(String),

    /// Configuration file or flag problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level errors (opening ports, devices, spools)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a fragment was not accepted as a device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// No matcher recognized the fragment, or a field has the wrong shape
    NoPatternMatched,
    /// A matcher recognized the framing but the field count is not five
    FieldCountMismatch,
    /// A required field is empty after trimming
    EmptyField,
}

impl ParseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoPatternMatched => "NoPatternMatched",
            Self::FieldCountMismatch => "FieldCountMismatch",
            Self::EmptyField => "EmptyField",
        }
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified parse failure carrying the offending fragment for the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} ({detail}) in fragment {fragment:?}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    /// The fragment exactly as handed to the parser
    pub fragment: String,
    /// Which matcher or field triggered the error
    pub detail: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, fragment: &str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            fragment: fragment.to_string(),
            detail: detail.into(),
        }
    }
}

/// Failures from one audit append. Row and archive are attempted independently,
/// so either or both may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFailure {
    /// Error writing the CSV row
    pub row: Option<String>,
    /// Error writing the archive artifact
    pub archive: Option<String>,
}

impl AuditFailure {
    pub fn is_empty(&self) -> bool {
        self.row.is_none() && self.archive.is_none()
    }
}

impl fmt::Display for AuditFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.row, &self.archive) {
            (Some(row), Some(archive)) => {
                write!(f, "log row failed: {}; archive failed: {}", row, archive)
            }
            (Some(row), None) => write!(f, "log row failed: {}", row),
            (None, Some(archive)) => write!(f, "archive failed: {}", archive),
            (None, None) => f.write_str("no audit failure"),
        }
    }
}

impl std::error::Error for AuditFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_names_kind() {
        let err = ParseError::new(ParseErrorKind::FieldCountMismatch, "a|b", "loose: 2 fields");
        let msg = err.to_string();
        assert!(msg.starts_with("FieldCountMismatch"));
        assert!(msg.contains("\"a|b\""));
    }

    #[test]
    fn test_audit_failure_describes_both_sides() {
        let failure = AuditFailure {
            row: Some("disk full".into()),
            archive: Some("permission denied".into()),
        };
        assert_eq!(
            failure.to_string(),
            "log row failed: disk full; archive failed: permission denied"
        );
        assert!(!failure.is_empty());
        assert!(AuditFailure::default().is_empty());
    }
}
