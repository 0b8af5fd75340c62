//! Operation journal backed by the SQLite datastore

#![allow(clippy::cast_sign_loss)]

use crate::error::{JournalError, Result};
use crate::operation::{
    Context, NewOperation, Operation, OperationFilter, OperationStatus, OperationType,
    Transaction, TransactionStatus,
};
use crate::store::{
    operation_from_row, transaction_from_row, Datastore, OPERATION_COLUMNS, TRANSACTION_COLUMNS,
};
use chrono::{DateTime, Utc};
use retrace_core::{hash_file_auto, FileMetadata};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use ulid::Ulid;

/// File name of the store inside a journal data directory
pub const DB_FILE_NAME: &str = "history.db";

/// Append-only record of filesystem operations and their transactions
pub struct Journal {
    store: Datastore,
    data_dir: Option<PathBuf>,
}

/// Aggregate figures for viewers and the CLI
#[derive(Debug, Clone, Default, Serialize)]
pub struct JournalStatistics {
    pub total_operations: u64,
    pub operations_completed: u64,
    pub operations_failed: u64,
    pub operations_rolled_back: u64,
    pub total_transactions: u64,
    pub active_transactions: u64,
    /// Logical store size in bytes
    pub database_size: u64,
    pub oldest_operation: Option<DateTime<Utc>>,
    pub newest_operation: Option<DateTime<Utc>>,
}

/// An operation row ready for insertion, with file state already captured
struct PreparedOperation {
    operation_type: OperationType,
    timestamp_ms: i64,
    source_path: String,
    destination_path: Option<String>,
    status: OperationStatus,
    transaction_id: Option<String>,
    file_hash: Option<String>,
    metadata: String,
    error_message: Option<String>,
}

impl PreparedOperation {
    fn capture(op: NewOperation) -> Result<Self> {
        let source_path = path_text(&op.source_path)?;
        let destination_path = op.destination_path.as_deref().map(path_text).transpose()?;

        let (file_hash, mut metadata) =
            capture_file_state(&op.source_path, op.destination_path.as_deref());

        // Caller context wins over captured attributes
        metadata.extend(op.context);

        let error_message = match op.status {
            OperationStatus::Failed => op.error_message,
            _ => None,
        };

        Ok(Self {
            operation_type: op.operation_type,
            timestamp_ms: Utc::now().timestamp_millis(),
            source_path,
            destination_path,
            status: op.status,
            transaction_id: op.transaction_id,
            file_hash,
            metadata: serde_json::to_string(&metadata)?,
            error_message,
        })
    }
}

/// Paths are stored as text and must round-trip exactly
fn path_text(path: &Path) -> Result<String> {
    path.to_str().map(str::to_owned).ok_or_else(|| {
        JournalError::InvalidValue(format!("path is not valid UTF-8: {}", path.display()))
    })
}

/// Hash and describe whichever journaled path still exists.
///
/// The source is preferred; when it is gone (the caller logged after the
/// mutation) the destination is used instead. `captured_from` records which.
/// Failures never abort the append: they leave the hash empty.
fn capture_file_state(source: &Path, destination: Option<&Path>) -> (Option<String>, Context) {
    let candidates = [(Some(source), "source"), (destination, "destination")];

    for (path, label) in candidates {
        let Some(path) = path else { continue };
        let meta = match FileMetadata::capture(path) {
            Ok(meta) => meta,
            Err(_) => continue,
        };

        let mut context = Context::new();
        context.insert("size".into(), meta.size.into());
        context.insert("mode".into(), meta.mode.into());
        if let Some(ms) = meta.modified_ms {
            context.insert("modified_ms".into(), ms.into());
        }
        context.insert("is_file".into(), meta.is_file.into());
        context.insert("is_dir".into(), meta.is_dir.into());
        context.insert("captured_from".into(), label.into());

        if !meta.is_file {
            return (None, context);
        }

        return match hash_file_auto(path) {
            Ok(hash) => (Some(hash.to_hex()), context),
            Err(e) => {
                tracing::warn!("Could not hash {}: {:#}", path.display(), e);
                (None, context)
            }
        };
    }

    (None, Context::new())
}

fn insert_operation(conn: &Connection, op: &PreparedOperation) -> Result<i64> {
    if let Some(txn_id) = &op.transaction_id {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM transactions WHERE transaction_id = ?1",
                [txn_id],
                |row| row.get(0),
            )
            .optional()?;

        match status.as_deref() {
            None => return Err(JournalError::TransactionNotFound(txn_id.clone())),
            Some(s) if s != TransactionStatus::Active.as_str() => {
                return Err(JournalError::TransactionClosed(txn_id.clone()));
            }
            Some(_) => {}
        }
    }

    conn.execute(
        "INSERT INTO operations (operation_type, timestamp_ms, source_path, destination_path, status, transaction_id, file_hash, metadata, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            op.operation_type.as_str(),
            op.timestamp_ms,
            op.source_path,
            op.destination_path,
            op.status.as_str(),
            op.transaction_id,
            op.file_hash,
            op.metadata,
            op.error_message,
        ],
    )?;
    let id = conn.last_insert_rowid();

    if let Some(txn_id) = &op.transaction_id {
        conn.execute(
            "UPDATE transactions SET operation_count = operation_count + 1 WHERE transaction_id = ?1",
            [txn_id],
        )?;
    }

    Ok(id)
}

/// Bring every transaction's `operation_count` in line with its member rows.
///
/// Returns the number of transactions corrected.
pub(crate) fn refresh_operation_counts(conn: &Connection) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE transactions
         SET operation_count = (SELECT COUNT(*) FROM operations o WHERE o.transaction_id = transactions.transaction_id)
         WHERE operation_count != (SELECT COUNT(*) FROM operations o WHERE o.transaction_id = transactions.transaction_id)",
        [],
    )?;
    Ok(changed)
}

impl Journal {
    /// Open or create the journal stored under `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let store = Datastore::open(&data_dir.join(DB_FILE_NAME))?;

        Ok(Self {
            store,
            data_dir: Some(data_dir.to_path_buf()),
        })
    }

    /// Open an existing journal for a viewer; writes will fail
    pub fn open_read_only(data_dir: &Path) -> Result<Self> {
        let store = Datastore::open_read_only(&data_dir.join(DB_FILE_NAME))?;

        Ok(Self {
            store,
            data_dir: Some(data_dir.to_path_buf()),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            store: Datastore::in_memory()?,
            data_dir: None,
        })
    }

    pub fn store(&self) -> &Datastore {
        &self.store
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Record one operation and return its id.
    ///
    /// Hashing happens before the store lock is taken. When the operation
    /// belongs to a transaction, the insert and the transaction's count bump
    /// commit together.
    pub fn log_operation(&self, op: NewOperation) -> Result<i64> {
        let prepared = PreparedOperation::capture(op)?;
        let id = self
            .store
            .with_unit_of_work(|tx| insert_operation(tx, &prepared))?;

        tracing::debug!(
            "Logged {} #{} ({}) {}",
            prepared.operation_type,
            id,
            prepared.status,
            prepared.source_path
        );
        Ok(id)
    }

    /// Positional shorthand for a COMPLETED standalone operation
    pub fn log(
        &self,
        operation_type: OperationType,
        source: &Path,
        destination: Option<&Path>,
    ) -> Result<i64> {
        let mut op = NewOperation::new(operation_type, source);
        if let Some(dest) = destination {
            op = op.destination(dest);
        }
        self.log_operation(op)
    }

    /// Record several operations in one unit of work; all or none are stored
    pub fn log_batch(&self, ops: Vec<NewOperation>) -> Result<Vec<i64>> {
        let prepared = ops
            .into_iter()
            .map(PreparedOperation::capture)
            .collect::<Result<Vec<_>>>()?;

        let ids = self.store.with_unit_of_work(|tx| {
            prepared
                .iter()
                .map(|op| insert_operation(tx, op))
                .collect::<Result<Vec<_>>>()
        })?;

        tracing::debug!("Logged batch of {} operations", ids.len());
        Ok(ids)
    }

    /// Open a new ACTIVE transaction and return its id
    pub fn start_transaction(&self, metadata: Option<Context>) -> Result<String> {
        let transaction_id = Ulid::new().to_string();
        let metadata = serde_json::to_string(&metadata.unwrap_or_default())?;
        let now = Utc::now().timestamp_millis();

        self.store.with_unit_of_work(|tx| {
            tx.execute(
                "INSERT INTO transactions (transaction_id, status, started_at_ms, operation_count, metadata)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![transaction_id, TransactionStatus::Active.as_str(), now, metadata],
            )?;
            Ok(())
        })?;

        tracing::debug!("Started transaction {}", transaction_id);
        Ok(transaction_id)
    }

    /// Close an ACTIVE transaction as COMPLETED.
    ///
    /// Returns false when the transaction does not exist or is already closed.
    pub fn commit_transaction(&self, transaction_id: &str) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let changed = self.store.with_unit_of_work(|tx| {
            Ok(tx.execute(
                "UPDATE transactions SET status = ?1, completed_at_ms = ?2
                 WHERE transaction_id = ?3 AND status = ?4",
                params![
                    TransactionStatus::Completed.as_str(),
                    now,
                    transaction_id,
                    TransactionStatus::Active.as_str()
                ],
            )?)
        })?;

        if changed == 0 {
            tracing::debug!("Commit ignored: transaction {} not active", transaction_id);
            return Ok(false);
        }

        tracing::info!("Committed transaction {}", transaction_id);
        Ok(true)
    }

    /// Close an ACTIVE transaction as FAILED and mark all of its operations
    /// ROLLED_BACK, in one unit of work.
    ///
    /// This only updates the journal; reversing the filesystem effects is the
    /// executor's job.
    pub fn rollback_transaction(&self, transaction_id: &str) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let affected = self.store.with_unit_of_work(|tx| {
            let changed = tx.execute(
                "UPDATE transactions SET status = ?1, completed_at_ms = ?2
                 WHERE transaction_id = ?3 AND status = ?4",
                params![
                    TransactionStatus::Failed.as_str(),
                    now,
                    transaction_id,
                    TransactionStatus::Active.as_str()
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }

            let ops = tx.execute(
                "UPDATE operations SET status = ?1, rolled_back_at_ms = COALESCE(rolled_back_at_ms, ?2)
                 WHERE transaction_id = ?3",
                params![OperationStatus::RolledBack.as_str(), now, transaction_id],
            )?;
            Ok(Some(ops))
        })?;

        match affected {
            Some(ops) => {
                tracing::info!("Rolled back transaction {} ({} operations)", transaction_id, ops);
                Ok(true)
            }
            None => {
                tracing::debug!("Rollback ignored: transaction {} not active", transaction_id);
                Ok(false)
            }
        }
    }

    /// Apply the COMPLETED -> ROLLED_BACK transition to one operation.
    ///
    /// Returns false if the operation is not COMPLETED.
    pub fn mark_rolled_back(&self, operation_id: i64) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        self.store.with_unit_of_work(|tx| {
            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM operations WHERE id = ?1",
                    [operation_id],
                    |row| row.get(0),
                )
                .optional()?;

            match status.as_deref() {
                None => Err(JournalError::OperationNotFound(operation_id)),
                Some(s) if s == OperationStatus::Completed.as_str() => {
                    tx.execute(
                        "UPDATE operations SET status = ?1, rolled_back_at_ms = ?2 WHERE id = ?3",
                        params![OperationStatus::RolledBack.as_str(), now, operation_id],
                    )?;
                    Ok(true)
                }
                Some(_) => Ok(false),
            }
        })
    }

    pub fn get_operation(&self, operation_id: i64) -> Result<Option<Operation>> {
        self.store.read(|conn| {
            let sql = format!("SELECT {} FROM operations WHERE id = ?1", OPERATION_COLUMNS);
            Ok(conn
                .query_row(&sql, [operation_id], operation_from_row)
                .optional()?)
        })
    }

    /// Query operations; oldest first unless the filter asks for descending
    pub fn get_operations(&self, filter: &OperationFilter) -> Result<Vec<Operation>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();

        if let Some(ty) = filter.operation_type {
            clauses.push("operation_type = ?");
            args.push(SqlValue::Text(ty.as_str().to_string()));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            args.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(txn_id) = &filter.transaction_id {
            clauses.push("transaction_id = ?");
            args.push(SqlValue::Text(txn_id.clone()));
        }
        if let Some(since) = filter.since {
            clauses.push("timestamp_ms >= ?");
            args.push(SqlValue::Integer(since.timestamp_millis()));
        }
        if let Some(until) = filter.until {
            clauses.push("timestamp_ms <= ?");
            args.push(SqlValue::Integer(until.timestamp_millis()));
        }

        let mut sql = format!("SELECT {} FROM operations", OPERATION_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        let order = if filter.descending { "DESC" } else { "ASC" };
        sql.push_str(&format!(" ORDER BY timestamp_ms {order}, id {order}"));
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(SqlValue::Integer(limit as i64));
        }

        self.store.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let ops = stmt
                .query_map(params_from_iter(args.iter()), operation_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ops)
        })
    }

    pub fn get_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        self.store.read(|conn| {
            let sql = format!(
                "SELECT {} FROM transactions WHERE transaction_id = ?1",
                TRANSACTION_COLUMNS
            );
            Ok(conn
                .query_row(&sql, [transaction_id], transaction_from_row)
                .optional()?)
        })
    }

    /// Transactions, newest first
    pub fn get_transactions(
        &self,
        status: Option<TransactionStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let mut sql = format!("SELECT {} FROM transactions", TRANSACTION_COLUMNS);
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(status) = status {
            sql.push_str(" WHERE status = ?");
            args.push(SqlValue::Text(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY started_at_ms DESC, transaction_id DESC");
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            args.push(SqlValue::Integer(limit as i64));
        }

        self.store.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let txns = stmt
                .query_map(params_from_iter(args.iter()), transaction_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(txns)
        })
    }

    /// Member operations of a transaction in the order they were logged
    pub fn transaction_operations(&self, transaction_id: &str) -> Result<Vec<Operation>> {
        self.get_operations(&OperationFilter::new().transaction_id(transaction_id))
    }

    /// Ids of operations that have a redo record, whatever its status.
    ///
    /// Once redone, an operation is replaced by its redo record: undoing
    /// the redo record makes that record redoable, not the original.
    pub fn redone_operation_ids(&self) -> Result<HashSet<i64>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT json_extract(metadata, '$.redo_of') FROM operations
                 WHERE json_extract(metadata, '$.redo_of') IS NOT NULL",
            )?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<HashSet<_>>>()?;
            Ok(ids)
        })
    }

    pub fn statistics(&self) -> Result<JournalStatistics> {
        let mut stats = self.store.read(|conn| {
            let mut stats = JournalStatistics::default();

            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM operations GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                let count = count as u64;
                stats.total_operations += count;
                match status.parse::<OperationStatus>()? {
                    OperationStatus::Completed => stats.operations_completed = count,
                    OperationStatus::Failed => stats.operations_failed = count,
                    OperationStatus::RolledBack => stats.operations_rolled_back = count,
                }
            }

            let (total, active): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(status = 'ACTIVE'), 0) FROM transactions",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            stats.total_transactions = total as u64;
            stats.active_transactions = active as u64;

            let (oldest, newest): (Option<i64>, Option<i64>) = conn.query_row(
                "SELECT MIN(timestamp_ms), MAX(timestamp_ms) FROM operations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            stats.oldest_operation = oldest.map(crate::operation::from_millis).transpose()?;
            stats.newest_operation = newest.map(crate::operation::from_millis).transpose()?;

            Ok(stats)
        })?;

        stats.database_size = self.store.size_bytes()?;
        Ok(stats)
    }

    /// Check denormalized counts and cross-table references.
    ///
    /// Reports:
    /// 1. Transactions whose operation_count disagrees with their member rows
    /// 2. Operations referencing a transaction that does not exist
    /// 3. FAILED operations without an error message
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        let start = Instant::now();
        tracing::info!("Starting journal integrity check...");

        let mut report = self.store.read(|conn| {
            let mut report = IntegrityReport::default();

            report.total_operations =
                conn.query_row("SELECT COUNT(*) FROM operations", [], |row| row.get::<_, i64>(0))?
                    as u64;
            report.total_transactions = conn
                .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get::<_, i64>(0))?
                as u64;

            let mut stmt = conn.prepare(
                "SELECT transaction_id, operation_count, actual FROM (
                     SELECT t.transaction_id, t.operation_count,
                            (SELECT COUNT(*) FROM operations o WHERE o.transaction_id = t.transaction_id) AS actual
                     FROM transactions t
                 )
                 WHERE operation_count != actual",
            )?;
            for row in stmt.query_map([], |row| {
                Ok(CountMismatch {
                    transaction_id: row.get(0)?,
                    recorded: row.get(1)?,
                    actual: row.get(2)?,
                })
            })? {
                let mismatch = row?;
                tracing::warn!(
                    "Transaction {} records {} operations but has {}",
                    mismatch.transaction_id,
                    mismatch.recorded,
                    mismatch.actual
                );
                report.count_mismatches.push(mismatch);
            }

            let mut stmt = conn.prepare(
                "SELECT o.id FROM operations o
                 WHERE o.transaction_id IS NOT NULL
                   AND NOT EXISTS (SELECT 1 FROM transactions t WHERE t.transaction_id = o.transaction_id)",
            )?;
            report.dangling_operations = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;

            let mut stmt = conn.prepare(
                "SELECT id FROM operations WHERE status = 'FAILED' AND (error_message IS NULL OR error_message = '')",
            )?;
            report.failed_without_message = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;

            Ok(report)
        })?;

        report.scan_duration = start.elapsed();
        tracing::info!(
            "Journal integrity check complete: {} operations, {} transactions, healthy={}",
            report.total_operations,
            report.total_transactions,
            report.is_healthy()
        );
        Ok(report)
    }

    /// Recompute transaction operation counts from member rows
    pub fn repair(&self, dry_run: bool) -> Result<RepairResult> {
        let start = Instant::now();
        let mut result = RepairResult::default();

        tracing::info!("Starting journal repair (dry_run: {})...", dry_run);

        let report = self.verify_integrity()?;
        let healthy = report.is_healthy();
        let mismatches = report.count_mismatches.len();
        result.initial_report = Some(report);

        if healthy {
            tracing::info!("Journal is healthy, no repair needed");
            return Ok(result);
        }

        if dry_run {
            result.counts_fixed = mismatches;
        } else {
            result.counts_fixed = self.store.with_unit_of_work(|tx| refresh_operation_counts(tx))?;
            result.final_report = Some(self.verify_integrity()?);
        }

        result.repair_duration = start.elapsed();
        tracing::info!("Journal repair complete ({} counts fixed)", result.counts_fixed);
        Ok(result)
    }
}

/// A transaction whose denormalized count disagrees with its rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountMismatch {
    pub transaction_id: String,
    pub recorded: i64,
    pub actual: i64,
}

/// Journal integrity report
#[derive(Debug, Default, Clone)]
pub struct IntegrityReport {
    pub total_operations: u64,
    pub total_transactions: u64,
    pub count_mismatches: Vec<CountMismatch>,
    /// Operations whose transaction row is missing
    pub dangling_operations: Vec<i64>,
    pub failed_without_message: Vec<i64>,
    pub scan_duration: Duration,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.count_mismatches.is_empty()
            && self.dangling_operations.is_empty()
            && self.failed_without_message.is_empty()
    }

    pub fn issue_count(&self) -> usize {
        self.count_mismatches.len()
            + self.dangling_operations.len()
            + self.failed_without_message.len()
    }
}

/// Journal repair result
#[derive(Debug, Default)]
pub struct RepairResult {
    pub initial_report: Option<IntegrityReport>,
    /// Only set when the repair was applied
    pub final_report: Option<IntegrityReport>,
    pub counts_fixed: usize,
    pub repair_duration: Duration,
}
