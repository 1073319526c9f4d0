//! Unified error types for the remo ecosystem
//!
//! Provides a common error type [`CoreError`] for dataset I/O, parsing and
//! validation. Domain-specific error types (partitioning, subproblem solving)
//! live next to their modules and convert into crate-level results at API
//! boundaries.

use thiserror::Error;

/// Unified error type for core data operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// I/O errors (file access, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Convenience type alias for Results using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::Validation("demand series too short".into());
        assert!(err.to_string().contains("Validation error"));
        assert!(err.to_string().contains("demand series too short"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let core_err: CoreError = io_err.into();
        assert!(matches!(core_err, CoreError::Io(_)));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> CoreResult<()> {
            Err(CoreError::Validation("test".into()))
        }

        fn outer() -> CoreResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
