//! DualWrite Error Types

use thiserror::Error;

use crate::replica::ReplicaName;

/// Result type alias for DualWrite operations
pub type Result<T> = std::result::Result<T, Error>;

/// DualWrite error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    // Replica errors
    #[error("Replica {replica} unavailable: {reason}")]
    ReplicaUnavailable { replica: ReplicaName, reason: String },

    #[error("Timed out after {millis} ms during {operation} on replica {replica}")]
    Timeout {
        replica: ReplicaName,
        operation: &'static str,
        millis: u64,
    },

    #[error("No replica available for reads")]
    NoReadableReplica,

    // Audit errors
    #[error("Audit context error: {0}")]
    AuditContext(String),

    // Domain errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Term not found: {0}")]
    TermNotFound(String),

    #[error("No expense row matches {0}")]
    RowNotFound(String),

    #[error("Invalid monetary amount '{0}'")]
    InvalidAmount(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ReplicaUnavailable { .. } | Error::Timeout { .. } | Error::NoReadableReplica
        )
    }

    /// Check if this error should be reported to a client as its own fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::TermNotFound(_)
                | Error::RowNotFound(_)
                | Error::InvalidAmount(_)
        )
    }
}
