//! Operation journal and transactional undo/redo
//!
//! This crate provides:
//! - SQLite datastore in WAL mode
//! - Append-only operation journal with transactions
//! - Scoped transaction guard
//! - Undo/redo validation and execution over a quarantine area
//! - Retention policy & cleanup
//! - Startup recovery

pub mod error;
pub mod executor;
mod fsutil;
pub mod journal;
pub mod operation;
pub mod quarantine;
pub mod recovery;
pub mod retention;
pub mod scope;
pub mod store;
pub mod undo;
pub mod validator;

// Re-exports
pub use error::{JournalError, Result};
pub use executor::{RollbackExecutor, RollbackReport};
pub use journal::{
    CountMismatch, IntegrityReport, Journal, JournalStatistics, RepairResult, DB_FILE_NAME,
};
pub use operation::{
    Context, NewOperation, Operation, OperationFilter, OperationStatus, OperationType,
    Transaction, TransactionStatus,
};
pub use quarantine::Quarantine;
pub use recovery::{recover_on_startup, RecoveryReport};
pub use retention::{sweep_quarantine, CleanupStats, JournalCleanup, RetentionPolicy};
pub use scope::TransactionScope;
pub use store::{Datastore, RowCounts, CURRENT_SCHEMA_VERSION};
pub use undo::{UndoManager, UndoOutcome};
pub use validator::{
    check_file_integrity, Conflict, ConflictType, Direction, OperationValidator, ValidationResult,
};
