//! Error types for the buffered R-tree.
//!
//! Errors fall into a few families:
//! - configuration errors, raised when a tree is opened with invalid parameters
//! - caller misuse (`IllegalArgument`)
//! - invariant violations, which always indicate a bug in the engine or its caller
//!   and are never recovered from internally
//! - container I/O and serialization failures
//! - verification failures from caller-side consistency checks

use std::io;
use thiserror::Error;

/// Errors that can occur in buffered R-tree operations
#[derive(Debug, Error)]
pub enum RRTreeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Buffer overflow: buffer already holds {capacity} operations")]
    BufferOverflow { capacity: usize },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Object tracer error: {0}")]
    Tracer(String),

    #[error("Verification failed: {diff}")]
    VerificationFailed { diff: String },
}

impl RRTreeError {
    /// Returns true for errors that signal a bug rather than bad input or I/O.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            RRTreeError::InvariantViolation(_) | RRTreeError::BufferOverflow { .. }
        )
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        RRTreeError::InvariantViolation(msg.into())
    }
}

/// Result type for buffered R-tree operations
pub type RRTreeResult<T> = Result<T, RRTreeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RRTreeError::Configuration("min capacity exceeds max capacity".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: min capacity exceeds max capacity"
        );

        let err = RRTreeError::BufferOverflow { capacity: 50 };
        assert_eq!(
            err.to_string(),
            "Buffer overflow: buffer already holds 50 operations"
        );

        let err = RRTreeError::VerificationFailed {
            diff: "missing: [1]".into(),
        };
        assert!(err.to_string().contains("missing: [1]"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        let err: RRTreeError = io_err.into();
        assert!(matches!(err, RRTreeError::Io(_)));
        assert!(!err.is_invariant_violation());
    }

    #[test]
    fn test_invariant_classification() {
        assert!(RRTreeError::invariant("node overflow").is_invariant_violation());
        assert!(RRTreeError::BufferOverflow { capacity: 1 }.is_invariant_violation());
        assert!(!RRTreeError::IllegalArgument("level".into()).is_invariant_violation());
    }
}
