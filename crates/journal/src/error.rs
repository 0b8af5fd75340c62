//! Journal error type

use thiserror::Error;

/// Errors surfaced by the journal, its store and the quarantine area.
///
/// Validation conflicts are not errors; they come back as a
/// [`ValidationResult`](crate::ValidationResult).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JournalError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// Appending to a transaction that was already committed or rolled back
    #[error("transaction {0} is already closed")]
    TransactionClosed(String),

    #[error("operation not found: {0}")]
    OperationNotFound(i64),

    #[error("transaction scope has not been entered")]
    ScopeNotEntered,

    #[error("transaction scope {0} is already closed")]
    ScopeClosed(String),

    /// The filesystem no longer matches what an inverse action expects
    #[error("path conflict: {0}")]
    PathConflict(String),

    #[error("quarantine error: {0}")]
    Quarantine(String),

    #[error("unsupported schema version {found} (this build understands up to {supported})")]
    SchemaVersion { found: i64, supported: i64 },

    #[error("invalid value in journal: {0}")]
    InvalidValue(String),
}

/// Result type for journal operations
pub type Result<T> = std::result::Result<T, JournalError>;
