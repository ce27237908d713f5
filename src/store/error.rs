//! Store error types
//!
//! Every backend, embedded or remote, reports failures through
//! [`StoreError`] so views handle them uniformly.

use thiserror::Error;

use crate::model::Table;

/// Errors that can occur reading or writing rows
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Row (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Row violates the table schema
    #[error("Invalid {table} row: {message}")]
    Constraint { table: Table, message: String },

    /// No row with this id
    #[error("{table} row not found: {id}")]
    NotFound { table: Table, id: String },

    /// Malformed request (unfiltered update, empty title, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transport failure talking to a remote backend
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote backend answered with an error status
    #[error("Backend returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::NotFound {
            table: Table::Beds,
            id: "b1".to_string(),
        };
        assert_eq!(err.to_string(), "beds row not found: b1");

        let err = StoreError::Remote {
            status: 400,
            message: "Title and message are required".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Backend returned 400: Title and message are required"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let store_err: StoreError = io_err.into();
        assert!(matches!(store_err, StoreError::Io(_)));
    }
}
