//! Error types for the replicated counter

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while maintaining or observing the counter
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// No reachable replica satisfies the requested role
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation exceeded its time bound
    #[error("Operation '{operation}' timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// Expected record is missing (seeding failed or was bypassed)
    #[error("Record not found: {key}")]
    NotFound { key: String },

    /// Backend rejected or failed the operation for a non-transient reason
    #[error("Backend error: {0}")]
    Backend(String),

    // =========================================================================
    // Diagnostic Errors
    // =========================================================================
    /// Status and configuration member listings do not line up
    #[error("Inconsistent topology: {0}")]
    InconsistentTopology(String),

    // =========================================================================
    // Service Errors
    // =========================================================================
    /// Lifecycle operation invoked in the wrong state
    #[error("Invalid service state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            after_ms: after.as_millis() as u64,
        }
    }

    /// Stable label for events and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::Timeout { .. } => "timeout",
            Error::NotFound { .. } => "not_found",
            Error::Backend(_) => "backend",
            Error::InconsistentTopology(_) => "inconsistent_topology",
            Error::InvalidState { .. } => "invalid_state",
            Error::Config(_) => "config",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether a retry may succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Internal(format!("Metrics registry error: {}", err))
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for Error {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        match err.kind.as_ref() {
            ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::ConnectionPoolCleared { .. } => Error::Connection(err.to_string()),
            _ => Error::Backend(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(Error::Connection("down".into()).kind(), "connection");
        assert_eq!(
            Error::timeout("increment", Duration::from_millis(250)).kind(),
            "timeout"
        );
        assert_eq!(
            Error::NotFound {
                key: "counter".into()
            }
            .kind(),
            "not_found"
        );
        assert_eq!(
            Error::InconsistentTopology("3 vs 2".into()).kind(),
            "inconsistent_topology"
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::timeout("read", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Operation 'read' timed out after 1500ms");
        assert!(err.is_transient());
    }

    #[test]
    fn test_not_found_is_not_transient() {
        let err = Error::NotFound {
            key: "counter".into(),
        };
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Record not found: counter");
    }
}
