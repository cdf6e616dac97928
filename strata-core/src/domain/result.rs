//! Result and error types for the core library

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core library error type
///
/// Every failure surfaced by the repository, ledger, lock manager, executor
/// and planner lands in one of these variants so callers can branch on the
/// kind of failure rather than on message text.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid change definition {location}: {reason}")]
    InvalidDefinition { location: String, reason: String },

    #[error("Integrity violation for change {change}: {reason}")]
    Integrity { change: String, reason: String },

    #[error("Timed out after {waited:?} waiting for the migration lock")]
    LockTimeout { waited: Duration },

    #[error("Migration lock is held by another process")]
    LockUnavailable,

    #[error("Change {change} failed and its transaction was rolled back: {message}")]
    Transaction { change: String, message: String },

    #[error("Change {0} has no backward body; use force to skip it")]
    Irreversible(String),

    #[error("Ledger table {0} uses a legacy layout that cannot record rollbacks")]
    LegacyLedger(String),

    #[error("Version error: {0}")]
    Version(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid definition error
    pub fn invalid_definition(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Create an integrity violation
    pub fn integrity(change: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Integrity {
            change: change.into(),
            reason: reason.into(),
        }
    }

    /// Create a version planner error
    pub fn version(msg: impl Into<String>) -> Self {
        Self::Version(msg.into())
    }

    /// True for lock timeout and lock unavailable errors
    pub fn is_lock_error(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::LockUnavailable)
    }

    /// True when a blocking acquisition ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Operation result with optional context (for JSON output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub context: Option<HashMap<String, serde_json::Value>>,
}

impl<T> OperationResult<T> {
    /// Create a successful result
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            context: None,
        }
    }

    /// Create a failed result
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: None,
        }
    }

    /// Attach a context value
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

impl<T> From<Result<T>> for OperationResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::fail(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_ok() {
        let result: OperationResult<i32> = OperationResult::ok(42);
        assert!(result.success);
        assert_eq!(result.data, Some(42));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_operation_result_fail_with_context() {
        let result: OperationResult<i32> = OperationResult::fail("Something went wrong")
            .with_context("change", serde_json::json!("002_b"));
        assert!(!result.success);
        assert!(result.data.is_none());
        assert_eq!(result.error, Some("Something went wrong".to_string()));
        assert_eq!(result.context.unwrap()["change"], "002_b");
    }

    #[test]
    fn test_from_result() {
        let err: Result<i32> = Err(Error::integrity("001_a", "fingerprint mismatch"));
        let result: OperationResult<i32> = err.into();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Integrity violation"));
    }

    #[test]
    fn test_lock_error_classification() {
        let timeout = Error::LockTimeout {
            waited: Duration::from_secs(3),
        };
        assert!(timeout.is_lock_error());
        assert!(timeout.is_timeout());
        assert!(Error::LockUnavailable.is_lock_error());
        assert!(!Error::LockUnavailable.is_timeout());
        assert!(!Error::not_found("x").is_lock_error());
    }
}
