//! Error types for the WarpGrid key/value state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("missing or empty key")]
    InvalidKey,

    #[error("empty value for key {0:?}")]
    InvalidValue(String),

    #[error("operation `{kind}` does not accept a {payload} request")]
    OperationMismatch {
        kind: &'static str,
        payload: &'static str,
    },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("etag mismatch for key {0:?}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("operation timed out")]
    Timeout,

    #[error("state store is closed")]
    Closed,
}

/// Coarse classification of a [`StateError`], used by callers to decide
/// whether an operation can be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid option. Fatal at initialization.
    Configuration,
    /// Malformed operation, rejected before any I/O.
    Validation,
    /// Etag mismatch. Retry after a fresh read.
    Conflict,
    /// Connection, statement, commit or decode failure.
    Io,
    /// Deadline exceeded.
    Timeout,
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StateError::Config(_) => ErrorKind::Configuration,
            StateError::InvalidKey
            | StateError::InvalidValue(_)
            | StateError::OperationMismatch { .. }
            | StateError::UnsupportedOperation(_) => ErrorKind::Validation,
            StateError::Conflict(_) => ErrorKind::Conflict,
            StateError::Database(_) | StateError::Decode(_) | StateError::Closed => ErrorKind::Io,
            StateError::Timeout => ErrorKind::Timeout,
        }
    }

    /// True for etag mismatches, the only errors worth retrying.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_classified() {
        assert_eq!(StateError::InvalidKey.kind(), ErrorKind::Validation);
        assert_eq!(
            StateError::InvalidValue("k".to_string()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            StateError::UnsupportedOperation("merge".to_string()).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn conflict_is_distinct_from_io() {
        let conflict = StateError::Conflict("k".to_string());
        assert!(conflict.is_conflict());

        let io = StateError::Database(sqlx::Error::PoolClosed);
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(!io.is_conflict());

        assert_eq!(StateError::Timeout.kind(), ErrorKind::Timeout);
        assert!(!StateError::Timeout.is_conflict());
    }

    #[test]
    fn mismatch_message_names_both_sides() {
        let err = StateError::OperationMismatch {
            kind: "delete",
            payload: "set",
        };
        assert_eq!(err.to_string(), "operation `delete` does not accept a set request");
    }
}
