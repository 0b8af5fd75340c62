//! Operation and transaction records

use crate::error::{JournalError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Free-form attributes attached to operations and transactions
pub type Context = Map<String, Value>;

/// Kind of filesystem mutation being journaled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Move,
    Rename,
    Delete,
    Copy,
    Create,
}

impl OperationType {
    pub const ALL: [OperationType; 5] = [
        OperationType::Move,
        OperationType::Rename,
        OperationType::Delete,
        OperationType::Copy,
        OperationType::Create,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Move => "MOVE",
            OperationType::Rename => "RENAME",
            OperationType::Delete => "DELETE",
            OperationType::Copy => "COPY",
            OperationType::Create => "CREATE",
        }
    }

    /// Whether the operation carries a destination path
    pub fn has_destination(&self) -> bool {
        matches!(
            self,
            OperationType::Move | OperationType::Rename | OperationType::Copy
        )
    }
}

/// Recorded outcome of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Completed,
    Failed,
    RolledBack,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Failed => "FAILED",
            OperationStatus::RolledBack => "ROLLED_BACK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Active,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Active => "ACTIVE",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

macro_rules! text_enum {
    ($ty:ty, $what:literal, [$($variant:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = JournalError;

            fn from_str(s: &str) -> Result<Self> {
                $(
                    if s.eq_ignore_ascii_case($variant.as_str()) {
                        return Ok($variant);
                    }
                )+
                Err(JournalError::InvalidValue(format!("unknown {} '{}'", $what, s)))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(
    OperationType,
    "operation type",
    [
        OperationType::Move,
        OperationType::Rename,
        OperationType::Delete,
        OperationType::Copy,
        OperationType::Create,
    ]
);
text_enum!(
    OperationStatus,
    "operation status",
    [
        OperationStatus::Completed,
        OperationStatus::Failed,
        OperationStatus::RolledBack,
    ]
);
text_enum!(
    TransactionStatus,
    "transaction status",
    [
        TransactionStatus::Active,
        TransactionStatus::Completed,
        TransactionStatus::Failed,
    ]
);

/// One journaled filesystem mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Store-assigned, monotonically increasing
    pub id: i64,
    pub operation_type: OperationType,
    pub timestamp: DateTime<Utc>,
    pub source_path: PathBuf,
    pub destination_path: Option<PathBuf>,
    pub status: OperationStatus,
    pub transaction_id: Option<String>,
    /// Hex BLAKE3 digest of the file that existed at log time
    pub file_hash: Option<String>,
    pub metadata: Context,
    pub error_message: Option<String>,
    /// When the operation was undone, if it was
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl Operation {
    /// Key of this operation's slot in the quarantine area.
    ///
    /// Redo records reuse the slot of the operation they re-materialize.
    pub fn quarantine_key(&self) -> i64 {
        self.metadata
            .get("quarantine_id")
            .and_then(Value::as_i64)
            .unwrap_or(self.id)
    }

    /// Id of the rolled-back operation this record re-applied, if any
    pub fn redo_of(&self) -> Option<i64> {
        self.metadata.get("redo_of").and_then(Value::as_i64)
    }

    /// Which path `file_hash` (and the captured metadata) describes
    pub fn hashed_path(&self) -> Option<&Path> {
        self.file_hash.as_ref()?;
        match self.metadata.get("captured_from").and_then(Value::as_str) {
            Some("source") => Some(&self.source_path),
            Some("destination") => self.destination_path.as_deref(),
            _ => None,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// A unit of atomicity over zero or more operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub operation_count: i64,
    pub metadata: Context,
}

impl Transaction {
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }
}

/// Arguments to [`Journal::log_operation`](crate::Journal::log_operation)
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub operation_type: OperationType,
    pub source_path: PathBuf,
    pub destination_path: Option<PathBuf>,
    pub status: OperationStatus,
    pub transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub context: Context,
}

impl NewOperation {
    pub fn new(operation_type: OperationType, source: impl Into<PathBuf>) -> Self {
        Self {
            operation_type,
            source_path: source.into(),
            destination_path: None,
            status: OperationStatus::Completed,
            transaction_id: None,
            error_message: None,
            context: Context::new(),
        }
    }

    pub fn destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination_path = Some(destination.into());
        self
    }

    pub fn status(mut self, status: OperationStatus) -> Self {
        self.status = status;
        self
    }

    pub fn transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    /// Mark the operation FAILED with the given message
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = OperationStatus::Failed;
        self.error_message = Some(message.into());
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context.extend(context);
        self
    }
}

/// Query filter for [`Journal::get_operations`](crate::Journal::get_operations)
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    pub operation_type: Option<OperationType>,
    pub status: Option<OperationStatus>,
    pub transaction_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    /// Newest first instead of oldest first
    pub descending: bool,
}

impl OperationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `n` most recent operations, newest first
    pub fn recent(n: usize) -> Self {
        Self {
            limit: Some(n),
            descending: true,
            ..Self::default()
        }
    }

    pub fn operation_type(mut self, operation_type: OperationType) -> Self {
        self.operation_type = Some(operation_type);
        self
    }

    pub fn status(mut self, status: OperationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// Convert stored Unix milliseconds back into a UTC instant
pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| JournalError::InvalidValue(format!("timestamp out of range: {}", ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_text_roundtrip() {
        for ty in OperationType::ALL {
            assert_eq!(ty.as_str().parse::<OperationType>().unwrap(), ty);
        }
        assert_eq!("move".parse::<OperationType>().unwrap(), OperationType::Move);
        assert!("TELEPORT".parse::<OperationType>().is_err());
    }

    #[test]
    fn test_status_text() {
        assert_eq!(OperationStatus::RolledBack.to_string(), "ROLLED_BACK");
        assert_eq!(
            "rolled_back".parse::<OperationStatus>().unwrap(),
            OperationStatus::RolledBack
        );
        assert_eq!(
            "ACTIVE".parse::<TransactionStatus>().unwrap(),
            TransactionStatus::Active
        );
    }

    #[test]
    fn test_new_operation_builder() {
        let op = NewOperation::new(OperationType::Move, "/a/one.txt")
            .destination("/b/one.txt")
            .transaction("01HTXN")
            .context("batch", "inbox");

        assert_eq!(op.destination_path.as_deref(), Some(Path::new("/b/one.txt")));
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.transaction_id.as_deref(), Some("01HTXN"));
        assert_eq!(op.context.get("batch"), Some(&json!("inbox")));

        let failed = NewOperation::new(OperationType::Delete, "/a/x").failed("permission denied");
        assert_eq!(failed.status, OperationStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("permission denied"));
    }

    #[test]
    fn test_quarantine_key_defaults_to_id() {
        let mut op = Operation {
            id: 7,
            operation_type: OperationType::Delete,
            timestamp: Utc::now(),
            source_path: PathBuf::from("/tmp/x"),
            destination_path: None,
            status: OperationStatus::Completed,
            transaction_id: None,
            file_hash: None,
            metadata: Context::new(),
            error_message: None,
            rolled_back_at: None,
        };
        assert_eq!(op.quarantine_key(), 7);
        assert_eq!(op.redo_of(), None);

        op.metadata.insert("quarantine_id".into(), json!(3));
        op.metadata.insert("redo_of".into(), json!(3));
        assert_eq!(op.quarantine_key(), 3);
        assert_eq!(op.redo_of(), Some(3));
    }

    #[test]
    fn test_recent_filter() {
        let filter = OperationFilter::recent(5).status(OperationStatus::Completed);
        assert!(filter.descending);
        assert_eq!(filter.limit, Some(5));
        assert_eq!(filter.status, Some(OperationStatus::Completed));
    }
}
