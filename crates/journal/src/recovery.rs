//! Crash recovery and consistency verification
//!
//! Brings the journal and the quarantine area back to a consistent state
//! after an unclean shutdown

use crate::error::Result;
use crate::journal::Journal;
use crate::operation::TransactionStatus;
use crate::quarantine::Quarantine;

/// What startup recovery found and fixed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Half-copied quarantine entries removed
    pub partial_entries_removed: usize,
    /// Transactions still ACTIVE, left by a process that died mid-scope
    pub stale_transactions: Vec<String>,
    /// Transaction counts corrected
    pub counts_repaired: usize,
    /// Integrity issues that remain after repair
    pub remaining_issues: usize,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.partial_entries_removed == 0
            && self.stale_transactions.is_empty()
            && self.counts_repaired == 0
            && self.remaining_issues == 0
    }
}

/// Verify journal consistency and recover from crashes.
///
/// ACTIVE transactions are reported but left ACTIVE: only their owner knows
/// whether to commit or roll them back.
pub fn recover_on_startup(journal: &Journal, quarantine: &Quarantine) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    // Step 1: Drop staging copies from interrupted cross-device moves
    report.partial_entries_removed = quarantine.remove_partials()?;

    // Step 2: Surface transactions nobody closed
    for txn in journal.get_transactions(Some(TransactionStatus::Active), None)? {
        tracing::warn!(
            "Recovery: transaction {} has been ACTIVE since {} ({} operations)",
            txn.transaction_id,
            txn.started_at,
            txn.operation_count
        );
        report.stale_transactions.push(txn.transaction_id);
    }

    // Step 3: Verify and repair the journal
    if journal.store().is_read_only() {
        report.remaining_issues = journal.verify_integrity()?.issue_count();
    } else {
        let repair = journal.repair(false)?;
        report.counts_repaired = repair.counts_fixed;
        report.remaining_issues = repair
            .final_report
            .or(repair.initial_report)
            .map_or(0, |r| r.issue_count());
    }

    if report.remaining_issues > 0 {
        tracing::warn!(
            "Recovery: {} journal issues need attention (run verify)",
            report.remaining_issues
        );
    } else {
        tracing::debug!("Recovery: journal verified");
    }
    Ok(report)
}
