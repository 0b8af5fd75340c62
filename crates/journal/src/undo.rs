//! Undo and redo on top of the journal
//!
//! Every request follows the same path: look the operation up, validate it,
//! run the inverse action, then record the result in the journal. An undo
//! flips the original record to ROLLED_BACK. A redo never touches the
//! original; it appends a new COMPLETED record pointing back at it, so the
//! redo can be undone like any other operation.

use crate::error::{JournalError, Result};
use crate::executor::RollbackExecutor;
use crate::journal::Journal;
use crate::operation::{
    Context, NewOperation, Operation, OperationFilter, OperationStatus, OperationType,
};
use crate::quarantine::Quarantine;
use crate::validator::{Conflict, OperationValidator, ValidationResult};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UndoOutcome {
    pub success: bool,
    pub operations_affected: usize,
    pub message: String,
    pub conflicts: Vec<Conflict>,
}

impl UndoOutcome {
    fn done(operations_affected: usize, message: String) -> Self {
        Self {
            success: true,
            operations_affected,
            message,
            conflicts: Vec::new(),
        }
    }

    fn refused(validation: ValidationResult) -> Self {
        Self {
            success: false,
            operations_affected: 0,
            message: validation.summary(),
            conflicts: validation.conflicts,
        }
    }

    fn failed(operations_affected: usize, message: String) -> Self {
        Self {
            success: false,
            operations_affected,
            message,
            conflicts: Vec::new(),
        }
    }
}

pub struct UndoManager<'j> {
    journal: &'j Journal,
    quarantine: Quarantine,
    verify_integrity: bool,
}

impl<'j> UndoManager<'j> {
    /// `data_dir` holds the quarantine area used by reversible deletions
    pub fn new(journal: &'j Journal, data_dir: &Path) -> Self {
        Self {
            journal,
            quarantine: Quarantine::for_data_dir(data_dir),
            verify_integrity: false,
        }
    }

    /// Refuse single-operation undo/redo when the file changed since logging
    pub fn with_integrity_check(mut self, enabled: bool) -> Self {
        self.verify_integrity = enabled;
        self
    }

    pub fn quarantine(&self) -> &Quarantine {
        &self.quarantine
    }

    fn validator(&self) -> OperationValidator<'_> {
        OperationValidator::new(&self.quarantine).with_integrity_check(self.verify_integrity)
    }

    fn executor(&self) -> RollbackExecutor<'_> {
        RollbackExecutor::new(&self.quarantine)
    }

    fn operation(&self, operation_id: i64) -> Result<Operation> {
        self.journal
            .get_operation(operation_id)?
            .ok_or(JournalError::OperationNotFound(operation_id))
    }

    /// Delete `path` reversibly: journal a DELETE, then move the file into
    /// the quarantine slot of the new record.
    ///
    /// If the file cannot be quarantined the record is marked ROLLED_BACK and
    /// the error returned.
    pub fn quarantine_delete(&self, path: &Path, transaction_id: Option<&str>) -> Result<i64> {
        let mut op = NewOperation::new(OperationType::Delete, path);
        if let Some(txn) = transaction_id {
            op = op.transaction(txn);
        }
        let id = self.journal.log_operation(op)?;

        if let Err(e) = self.quarantine.stash(id, path) {
            tracing::warn!("Could not quarantine {}: {}", path.display(), e);
            self.journal.mark_rolled_back(id)?;
            return Err(e);
        }
        Ok(id)
    }

    pub fn undo_operation(&self, operation_id: i64) -> Result<UndoOutcome> {
        let op = self.operation(operation_id)?;

        let validation = self.validator().validate_undo(&op);
        if !validation.can_proceed {
            tracing::debug!("Undo of {} refused: {}", op.id, validation.summary());
            return Ok(UndoOutcome::refused(validation));
        }

        if let Err(e) = self.executor().rollback_operation(&op) {
            tracing::warn!("Undo of operation {} failed: {}", op.id, e);
            return Ok(UndoOutcome::failed(0, format!("undo failed: {}", e)));
        }
        self.journal.mark_rolled_back(op.id)?;

        Ok(UndoOutcome::done(1, format!("Undid {}", describe(&op))))
    }

    /// Undo the most recent operation that is still in effect
    pub fn undo_last_operation(&self) -> Result<UndoOutcome> {
        match self.undo_stack(1)?.into_iter().next() {
            Some(op) => self.undo_operation(op.id),
            None => Ok(UndoOutcome::failed(0, "nothing to undo".to_string())),
        }
    }

    /// Undo every operation of a closed transaction, newest first.
    ///
    /// Stops at the first operation that cannot be reversed; the ones already
    /// reversed are recorded as ROLLED_BACK.
    pub fn undo_transaction(&self, transaction_id: &str) -> Result<UndoOutcome> {
        let txn = self
            .journal
            .get_transaction(transaction_id)?
            .ok_or_else(|| JournalError::TransactionNotFound(transaction_id.to_string()))?;
        if txn.is_active() {
            return Ok(UndoOutcome::failed(
                0,
                format!("transaction {} is still active", transaction_id),
            ));
        }

        let ops = self.journal.transaction_operations(transaction_id)?;
        if !ops.iter().any(|op| op.status == OperationStatus::Completed) {
            return Ok(UndoOutcome::failed(
                0,
                format!("transaction {} has nothing to undo", transaction_id),
            ));
        }

        let report = self.executor().rollback_transaction(transaction_id, &ops);
        for &id in &report.rolled_back {
            self.journal.mark_rolled_back(id)?;
        }

        let affected = report.operations_rolled_back;
        match report.failure {
            None => Ok(UndoOutcome::done(
                affected,
                format!("Undid {} operations of transaction {}", affected, transaction_id),
            )),
            Some((id, reason)) => Ok(UndoOutcome::failed(
                affected,
                format!(
                    "undid {} operations, then stopped at operation {}: {}",
                    affected, id, reason
                ),
            )),
        }
    }

    pub fn redo_operation(&self, operation_id: i64) -> Result<UndoOutcome> {
        let op = self.operation(operation_id)?;
        if self.journal.redone_operation_ids()?.contains(&op.id) {
            return Ok(UndoOutcome::failed(
                0,
                format!("operation {} was already redone", op.id),
            ));
        }

        let validation = self.validator().validate_redo(&op);
        if !validation.can_proceed {
            tracing::debug!("Redo of {} refused: {}", op.id, validation.summary());
            return Ok(UndoOutcome::refused(validation));
        }

        if let Err(e) = self.executor().redo_operation(&op) {
            tracing::warn!("Redo of operation {} failed: {}", op.id, e);
            return Ok(UndoOutcome::failed(0, format!("redo failed: {}", e)));
        }
        let record = self.journal.log_operation(redo_record(&op))?;

        Ok(UndoOutcome::done(
            1,
            format!("Redid {} as operation {}", describe(&op), record),
        ))
    }

    /// Redo the most recently undone operation
    pub fn redo_last_operation(&self) -> Result<UndoOutcome> {
        match self.redo_stack(1)?.into_iter().next() {
            Some(op) => self.redo_operation(op.id),
            None => Ok(UndoOutcome::failed(0, "nothing to redo".to_string())),
        }
    }

    /// Re-apply the rolled-back members of a transaction in their original
    /// order, recording the redo records under a new transaction
    pub fn redo_transaction(&self, transaction_id: &str) -> Result<UndoOutcome> {
        if self.journal.get_transaction(transaction_id)?.is_none() {
            return Err(JournalError::TransactionNotFound(transaction_id.to_string()));
        }

        let redone = self.journal.redone_operation_ids()?;
        let pending: Vec<Operation> = self
            .journal
            .transaction_operations(transaction_id)?
            .into_iter()
            .filter(|op| op.status == OperationStatus::RolledBack && !redone.contains(&op.id))
            .collect();
        if pending.is_empty() {
            return Ok(UndoOutcome::failed(
                0,
                format!("transaction {} has nothing to redo", transaction_id),
            ));
        }

        let mut metadata = Context::new();
        metadata.insert("redo_of_transaction".into(), transaction_id.into());
        let mut scope = self.journal.begin(Some(metadata))?;
        let validator = self.validator();
        let executor = self.executor();

        let mut affected = 0;
        let mut stopped: Option<UndoOutcome> = None;
        for op in &pending {
            let validation = validator.validate_redo(op);
            if !validation.can_proceed {
                let mut outcome = UndoOutcome::refused(validation);
                outcome.message = format!(
                    "redid {} operations, then stopped at operation {}: {}",
                    affected, op.id, outcome.message
                );
                stopped = Some(outcome);
                break;
            }
            if let Err(e) = executor.redo_operation(op) {
                stopped = Some(UndoOutcome::failed(
                    0,
                    format!(
                        "redid {} operations, then stopped at operation {}: {}",
                        affected, op.id, e
                    ),
                ));
                break;
            }
            scope.log(redo_record(op))?;
            affected += 1;
        }

        // The records describe what is now on disk, so keep whatever was redone
        if affected > 0 {
            scope.commit()?;
        } else {
            scope.rollback()?;
        }

        match stopped {
            None => Ok(UndoOutcome::done(
                affected,
                format!("Redid {} operations of transaction {}", affected, transaction_id),
            )),
            Some(mut outcome) => {
                outcome.operations_affected = affected;
                Ok(outcome)
            }
        }
    }

    pub fn can_undo(&self, operation_id: i64) -> Result<bool> {
        let op = self.operation(operation_id)?;
        Ok(self.validator().validate_undo(&op).can_proceed)
    }

    pub fn can_redo(&self, operation_id: i64) -> Result<bool> {
        let op = self.operation(operation_id)?;
        if self.journal.redone_operation_ids()?.contains(&op.id) {
            return Ok(false);
        }
        Ok(self.validator().validate_redo(&op).can_proceed)
    }

    /// Operations still in effect, most recent first
    pub fn undo_stack(&self, limit: usize) -> Result<Vec<Operation>> {
        self.journal
            .get_operations(&OperationFilter::recent(limit).status(OperationStatus::Completed))
    }

    /// Undone operations that have not been redone, most recently undone first
    pub fn redo_stack(&self, limit: usize) -> Result<Vec<Operation>> {
        let redone: HashSet<i64> = self.journal.redone_operation_ids()?;
        let mut ops: Vec<Operation> = self
            .journal
            .get_operations(&OperationFilter::new().status(OperationStatus::RolledBack))?
            .into_iter()
            .filter(|op| !redone.contains(&op.id))
            .collect();
        ops.sort_by(|a, b| (b.rolled_back_at, b.id).cmp(&(a.rolled_back_at, a.id)));
        ops.truncate(limit);
        Ok(ops)
    }

    /// Most recent operations of any status
    pub fn history(&self, limit: usize) -> Result<Vec<Operation>> {
        self.journal.get_operations(&OperationFilter::recent(limit))
    }
}

fn redo_record(op: &Operation) -> NewOperation {
    let mut record = NewOperation::new(op.operation_type, &op.source_path)
        .context("redo_of", op.id)
        .context("quarantine_id", op.quarantine_key());
    if let Some(dest) = &op.destination_path {
        record = record.destination(dest);
    }
    record
}

fn describe(op: &Operation) -> String {
    match &op.destination_path {
        Some(dest) => format!(
            "{} {} -> {}",
            op.operation_type,
            op.source_path.display(),
            dest.display()
        ),
        None => format!("{} {}", op.operation_type, op.source_path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::TransactionStatus;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Journal, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        let journal = Journal::open(&data_dir).unwrap();
        (temp_dir, journal, data_dir)
    }

    #[test]
    fn test_undo_then_redo_move() -> Result<()> {
        let (temp_dir, journal, data_dir) = setup();
        let manager = UndoManager::new(&journal, &data_dir);
        let src = temp_dir.path().join("report.pdf");
        let dst = temp_dir.path().join("Archive/report.pdf");
        fs::create_dir_all(dst.parent().unwrap())?;
        fs::write(&dst, b"pdf")?;
        let id = journal.log(OperationType::Move, &src, Some(&dst))?;

        let outcome = manager.undo_operation(id)?;
        assert!(outcome.success, "{}", outcome.message);
        assert!(src.exists() && !dst.exists());
        assert_eq!(
            journal.get_operation(id)?.unwrap().status,
            OperationStatus::RolledBack
        );

        let outcome = manager.redo_operation(id)?;
        assert!(outcome.success, "{}", outcome.message);
        assert!(!src.exists() && dst.exists());

        // The original record is untouched; a new record points back at it
        assert_eq!(
            journal.get_operation(id)?.unwrap().status,
            OperationStatus::RolledBack
        );
        let latest = manager.history(1)?.remove(0);
        assert_eq!(latest.redo_of(), Some(id));
        assert_eq!(latest.status, OperationStatus::Completed);

        let again = manager.redo_operation(id)?;
        assert!(!again.success);
        assert!(again.message.contains("already redone"));
        Ok(())
    }

    #[test]
    fn test_refused_undo_reports_conflicts() -> Result<()> {
        let (temp_dir, journal, data_dir) = setup();
        let manager = UndoManager::new(&journal, &data_dir);
        let id = journal.log(
            OperationType::Rename,
            &temp_dir.path().join("a"),
            Some(&temp_dir.path().join("b")),
        )?;

        let outcome = manager.undo_operation(id)?;
        assert!(!outcome.success);
        assert_eq!(outcome.operations_affected, 0);
        assert_eq!(outcome.conflicts.len(), 1);
        assert!(!manager.can_undo(id)?);
        Ok(())
    }

    #[test]
    fn test_quarantine_delete_round_trip() -> Result<()> {
        let (temp_dir, journal, data_dir) = setup();
        let manager = UndoManager::new(&journal, &data_dir);
        let file = temp_dir.path().join("tax-2023.xlsx");
        fs::write(&file, b"sheet")?;

        let id = manager.quarantine_delete(&file, None)?;
        assert!(!file.exists());
        assert!(journal.get_operation(id)?.unwrap().file_hash.is_some());

        assert!(manager.undo_last_operation()?.success);
        assert_eq!(fs::read(&file)?, b"sheet");

        assert!(manager.redo_last_operation()?.success);
        assert!(!file.exists());

        // Undoing the redo record restores the file from the same slot
        let redo = manager.history(1)?.remove(0).id;
        assert!(manager.undo_last_operation()?.success);
        assert_eq!(fs::read(&file)?, b"sheet");
        assert!(!manager.can_redo(id)?);
        assert!(manager.can_redo(redo)?);
        Ok(())
    }

    #[test]
    fn test_undone_redo_replaces_original_on_redo_stack() -> Result<()> {
        let (temp_dir, journal, data_dir) = setup();
        let manager = UndoManager::new(&journal, &data_dir);
        let file = temp_dir.path().join("draft.md");
        fs::write(&file, b"# draft")?;
        let id = journal.log(OperationType::Create, &file, None)?;

        assert!(manager.undo_last_operation()?.success);
        assert!(manager.redo_last_operation()?.success);
        let redo = manager.history(1)?.remove(0).id;
        assert!(manager.undo_last_operation()?.success);
        assert!(!file.exists());

        let stack: Vec<i64> = manager.redo_stack(10)?.iter().map(|op| op.id).collect();
        assert_eq!(stack, vec![redo]);
        assert!(!manager.redo_operation(id)?.success);

        let outcome = manager.redo_last_operation()?;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(fs::read(&file)?, b"# draft");
        Ok(())
    }

    #[test]
    fn test_quarantine_delete_missing_file() -> Result<()> {
        let (temp_dir, journal, data_dir) = setup();
        let manager = UndoManager::new(&journal, &data_dir);

        let missing = temp_dir.path().join("ghost");
        assert!(manager.quarantine_delete(&missing, None).is_err());

        let op = manager.history(1)?.remove(0);
        assert_eq!(op.status, OperationStatus::RolledBack);
        Ok(())
    }

    #[test]
    fn test_undo_and_redo_transaction() -> Result<()> {
        let (temp_dir, journal, data_dir) = setup();
        let manager = UndoManager::new(&journal, &data_dir);
        let inbox = temp_dir.path().join("inbox.txt");
        let sorted = temp_dir.path().join("sorted/inbox.txt");
        let renamed = temp_dir.path().join("sorted/2024-inbox.txt");
        fs::create_dir_all(sorted.parent().unwrap())?;
        fs::write(&renamed, b"mail")?;

        let txn = journal.transaction(None, |scope| {
            scope.log_move(&inbox, &sorted)?;
            scope.log_rename(&sorted, &renamed)?;
            Ok::<_, JournalError>(scope.transaction_id().unwrap_or_default().to_string())
        })?;

        let outcome = manager.undo_transaction(&txn)?;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.operations_affected, 2);
        assert_eq!(fs::read(&inbox)?, b"mail");
        assert!(!renamed.exists());

        let outcome = manager.redo_transaction(&txn)?;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.operations_affected, 2);
        assert_eq!(fs::read(&renamed)?, b"mail");

        let redo_txn = journal
            .get_transactions(Some(TransactionStatus::Completed), None)?
            .into_iter()
            .find(|t| t.transaction_id != txn)
            .unwrap();
        assert_eq!(redo_txn.operation_count, 2);
        assert_eq!(
            redo_txn.metadata.get("redo_of_transaction").and_then(|v| v.as_str()),
            Some(txn.as_str())
        );

        assert!(!manager.redo_transaction(&txn)?.success);
        Ok(())
    }

    #[test]
    fn test_undo_transaction_refuses_active() -> Result<()> {
        let (_temp_dir, journal, data_dir) = setup();
        let manager = UndoManager::new(&journal, &data_dir);
        let txn = journal.start_transaction(None)?;

        let outcome = manager.undo_transaction(&txn)?;
        assert!(!outcome.success);
        assert!(matches!(
            manager.undo_transaction("01NOPE"),
            Err(JournalError::TransactionNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_stacks() -> Result<()> {
        let (temp_dir, journal, data_dir) = setup();
        let manager = UndoManager::new(&journal, &data_dir);
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let path = temp_dir.path().join(name);
            fs::write(&path, name)?;
            ids.push(journal.log(OperationType::Create, &path, None)?);
        }

        assert_eq!(manager.undo_stack(10)?.len(), 3);
        assert_eq!(manager.undo_stack(10)?[0].id, ids[2]);

        manager.undo_last_operation()?;
        std::thread::sleep(std::time::Duration::from_millis(5));
        manager.undo_last_operation()?;
        let redo: Vec<i64> = manager.redo_stack(10)?.iter().map(|op| op.id).collect();
        assert_eq!(redo, vec![ids[1], ids[2]]);
        assert_eq!(manager.undo_stack(10)?.len(), 1);

        assert!(manager.undo_last_operation()?.success);
        assert!(!manager.undo_last_operation()?.success);
        Ok(())
    }
}
