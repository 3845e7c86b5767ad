//! Error types for demonlist-engine
//!
//! Every failure is scoped to one transaction: the operation is rejected and
//! nothing it did is kept.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ListError {
    /// Caller supplied something the list invariants cannot accept
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Integrity conflict that could not be resolved locally
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ListError>;

impl ListError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ListError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ListError::NotFound(msg.into())
    }

    /// Whether retrying the whole operation may succeed.
    ///
    /// Only lock contention qualifies; every recomputation step re-derives
    /// its state from base tables, so a retry never double-applies anything.
    pub fn is_retryable(&self) -> bool {
        match self {
            ListError::Storage(rusqlite::Error::SqliteFailure(e, _)) => {
                matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }
}

/// True when the error is a UNIQUE or PRIMARY KEY violation
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_is_retryable() {
        let err = ListError::Storage(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(err.is_retryable());
        assert!(!ListError::validation("nope").is_retryable());
    }

    #[test]
    fn test_unique_violation_detection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a INTEGER PRIMARY KEY, b TEXT UNIQUE); INSERT INTO t VALUES (1, 'x');")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES (2, 'x')", [])
            .unwrap_err();
        assert!(is_unique_violation(&err));

        let err = conn.execute("INSERT INTO missing VALUES (1)", []).unwrap_err();
        assert!(!is_unique_violation(&err));
    }
}
