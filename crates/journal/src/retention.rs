//! Retention policy and journal cleanup
//!
//! Every deletion here skips operations that belong to an ACTIVE
//! transaction, and recomputes transaction counts in the same unit of work.

use crate::error::Result;
use crate::journal::{refresh_operation_counts, Journal};
use crate::operation::OperationStatus;
use crate::quarantine::Quarantine;
use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::params_from_iter;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;

/// Age after which FAILED and ROLLED_BACK rows are reclaimed by auto cleanup
pub const TERMINAL_RETENTION_DAYS: u32 = 7;

/// Upper bound on delete-and-vacuum passes in [`JournalCleanup::cleanup_by_size`]
const MAX_SIZE_PASSES: usize = 10;

/// Retention policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep at most this many operations (default: 10000)
    pub max_operations: u64,
    /// Drop operations older than this (default: 30 days)
    pub max_age_days: u32,
    /// Shrink the store below this size (default: 100 MB)
    pub max_size_bytes: u64,
    pub auto_cleanup_enabled: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_operations: 10_000,
            max_age_days: 30,
            max_size_bytes: 100 * 1024 * 1024,
            auto_cleanup_enabled: true,
        }
    }
}

/// Rows removed by a cleanup run, per category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    pub ran: bool,
    pub old_operations: usize,
    pub excess_operations: usize,
    pub failed_operations: usize,
    pub rolled_back_operations: usize,
    pub orphaned_transactions: usize,
    pub size_operations: usize,
    pub duration_ms: u64,
}

impl CleanupStats {
    pub fn operations_deleted(&self) -> usize {
        self.old_operations
            + self.excess_operations
            + self.failed_operations
            + self.rolled_back_operations
            + self.size_operations
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Cleanup completed: {} operations and {} transactions deleted in {} ms",
            self.operations_deleted(),
            self.orphaned_transactions,
            self.duration_ms
        );
    }
}

pub struct JournalCleanup<'j> {
    journal: &'j Journal,
    policy: RetentionPolicy,
}

impl<'j> JournalCleanup<'j> {
    pub fn new(journal: &'j Journal, policy: RetentionPolicy) -> Self {
        Self { journal, policy }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// True when auto cleanup is enabled and any threshold is exceeded
    pub fn should_cleanup(&self) -> Result<bool> {
        if !self.policy.auto_cleanup_enabled {
            return Ok(false);
        }

        let counts = self.journal.store().row_counts()?;
        if counts.operations > self.policy.max_operations {
            return Ok(true);
        }

        let cutoff = cutoff_ms(self.policy.max_age_days);
        let oldest: Option<i64> = self.journal.store().read(|conn| {
            Ok(conn.query_row("SELECT MIN(timestamp_ms) FROM operations", [], |row| {
                row.get(0)
            })?)
        })?;
        if oldest.map_or(false, |ms| ms < cutoff) {
            return Ok(true);
        }

        Ok(self.journal.store().size_bytes()? > self.policy.max_size_bytes)
    }

    /// Delete the oldest operations beyond `max_operations`
    pub fn cleanup_by_count(&self, max_operations: u64) -> Result<usize> {
        let total = self.journal.store().row_counts()?.operations;
        if total <= max_operations {
            return Ok(0);
        }

        let excess = (total - max_operations) as i64;
        let deleted = self.delete_oldest("1 = 1", Vec::new(), excess)?;
        tracing::info!("Deleted {} operations over the limit of {}", deleted, max_operations);
        Ok(deleted)
    }

    pub fn cleanup_old_operations(&self, max_age_days: u32) -> Result<usize> {
        let deleted = self.delete_oldest(
            "o.timestamp_ms < ?",
            vec![SqlValue::Integer(cutoff_ms(max_age_days))],
            -1,
        )?;
        tracing::info!("Deleted {} operations older than {} days", deleted, max_age_days);
        Ok(deleted)
    }

    /// Delete the oldest tenth of the journal, vacuum, and repeat until the
    /// store fits `max_size_bytes`
    pub fn cleanup_by_size(&self) -> Result<usize> {
        let store = self.journal.store();
        let mut deleted = 0;

        for _ in 0..MAX_SIZE_PASSES {
            if store.size_bytes()? <= self.policy.max_size_bytes {
                break;
            }

            let total = store.row_counts()?.operations;
            if total == 0 {
                break;
            }
            let batch = (total / 10).max(1) as i64;
            let removed = self.delete_oldest("1 = 1", Vec::new(), batch)?;
            store.vacuum()?;
            deleted += removed;

            // Only ACTIVE transaction members remain
            if removed == 0 {
                break;
            }
        }

        if deleted > 0 {
            tracing::info!(
                "Deleted {} operations to bring the store under {} bytes",
                deleted,
                self.policy.max_size_bytes
            );
        }
        Ok(deleted)
    }

    pub fn cleanup_failed_operations(&self, older_than_days: u32) -> Result<usize> {
        self.cleanup_status(OperationStatus::Failed, older_than_days)
    }

    pub fn cleanup_rolled_back_operations(&self, older_than_days: u32) -> Result<usize> {
        self.cleanup_status(OperationStatus::RolledBack, older_than_days)
    }

    fn cleanup_status(&self, status: OperationStatus, older_than_days: u32) -> Result<usize> {
        let deleted = self.delete_oldest(
            "o.status = ? AND o.timestamp_ms < ?",
            vec![
                SqlValue::Text(status.as_str().to_string()),
                SqlValue::Integer(cutoff_ms(older_than_days)),
            ],
            -1,
        )?;
        tracing::info!(
            "Deleted {} {} operations older than {} days",
            deleted,
            status,
            older_than_days
        );
        Ok(deleted)
    }

    /// Delete closed transactions that no longer have any member operations
    pub fn cleanup_orphaned_transactions(&self) -> Result<usize> {
        let deleted = self.journal.store().with_unit_of_work(|tx| {
            refresh_operation_counts(tx)?;
            Ok(tx.execute(
                "DELETE FROM transactions
                 WHERE status != 'ACTIVE'
                   AND operation_count = 0
                   AND NOT EXISTS (SELECT 1 FROM operations o WHERE o.transaction_id = transactions.transaction_id)",
                [],
            )?)
        })?;
        tracing::info!("Deleted {} orphaned transactions", deleted);
        Ok(deleted)
    }

    /// Run every cleanup step when the policy says cleanup is due
    pub fn auto_cleanup(&self) -> Result<CleanupStats> {
        if !self.should_cleanup()? {
            tracing::debug!("Journal within retention limits, skipping cleanup");
            return Ok(CleanupStats::default());
        }
        self.run_all()
    }

    /// Run every cleanup step against the policy's limits unconditionally
    pub fn run_all(&self) -> Result<CleanupStats> {
        let start = Instant::now();
        let mut stats = CleanupStats {
            ran: true,
            ..CleanupStats::default()
        };
        stats.old_operations = self.cleanup_old_operations(self.policy.max_age_days)?;
        stats.excess_operations = self.cleanup_by_count(self.policy.max_operations)?;
        stats.failed_operations = self.cleanup_failed_operations(TERMINAL_RETENTION_DAYS)?;
        stats.rolled_back_operations =
            self.cleanup_rolled_back_operations(TERMINAL_RETENTION_DAYS)?;
        stats.orphaned_transactions = self.cleanup_orphaned_transactions()?;
        stats.size_operations = self.cleanup_by_size()?;
        stats.duration_ms = start.elapsed().as_millis() as u64;

        stats.log_summary();
        Ok(stats)
    }

    /// Wipe every operation and transaction. Does nothing unless `confirm`.
    pub fn clear_all(&self, confirm: bool) -> Result<bool> {
        if !confirm {
            tracing::warn!("Refusing to clear the journal without confirmation");
            return Ok(false);
        }

        let (ops, txns) = self.journal.store().with_unit_of_work(|tx| {
            let ops = tx.execute("DELETE FROM operations", [])?;
            let txns = tx.execute("DELETE FROM transactions", [])?;
            Ok((ops, txns))
        })?;
        self.journal.store().vacuum()?;

        tracing::warn!("Cleared journal: {} operations, {} transactions", ops, txns);
        Ok(true)
    }

    /// Delete up to `limit` (-1 for all) of the oldest operations matching
    /// `condition`, leaving members of ACTIVE transactions alone
    fn delete_oldest(&self, condition: &str, mut args: Vec<SqlValue>, limit: i64) -> Result<usize> {
        let sql = format!(
            "DELETE FROM operations WHERE id IN (
                 SELECT o.id FROM operations o
                 LEFT JOIN transactions t ON t.transaction_id = o.transaction_id
                 WHERE (t.status IS NULL OR t.status != 'ACTIVE') AND {condition}
                 ORDER BY o.timestamp_ms, o.id
                 LIMIT ?
             )"
        );
        args.push(SqlValue::Integer(limit));

        self.journal.store().with_unit_of_work(|tx| {
            let deleted = tx.execute(&sql, params_from_iter(args.iter()))?;
            if deleted > 0 {
                refresh_operation_counts(tx)?;
            }
            Ok(deleted)
        })
    }
}

/// Remove quarantine slots whose owning operation is gone from the journal.
///
/// Live keys are marked from the surviving rows (redo records keep the slot
/// of the operation they re-applied), then every other slot is swept.
pub fn sweep_quarantine(journal: &Journal, quarantine: &Quarantine) -> Result<usize> {
    let live: HashSet<i64> = journal.store().read(|conn| {
        let mut stmt = conn.prepare(
            "SELECT COALESCE(json_extract(metadata, '$.quarantine_id'), id) FROM operations",
        )?;
        let keys = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(keys)
    })?;

    let mut swept = 0;
    for key in quarantine.keys()? {
        if !live.contains(&key) {
            quarantine.discard(key)?;
            swept += 1;
        }
    }

    if swept > 0 {
        tracing::info!("Swept {} unreferenced quarantine slots", swept);
    }
    Ok(swept)
}

fn cutoff_ms(days: u32) -> i64 {
    (Utc::now() - ChronoDuration::days(i64::from(days))).timestamp_millis()
}
