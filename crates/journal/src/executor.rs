//! Filesystem inverse actions for journaled operations
//!
//! | type   | rollback                          | redo                              |
//! |--------|-----------------------------------|-----------------------------------|
//! | MOVE   | destination -> source             | source -> destination             |
//! | RENAME | destination -> source             | source -> destination             |
//! | DELETE | quarantine slot -> source         | source -> quarantine slot         |
//! | COPY   | destination -> quarantine slot    | copy source to destination        |
//! | CREATE | source -> quarantine slot         | quarantine slot -> source         |
//!
//! Each action checks the paths it touches before acting, so retrying after a
//! crash either completes or refuses without clobbering anything.

use crate::error::{JournalError, Result};
use crate::fsutil::{copy_path, path_exists};
use crate::operation::{Operation, OperationStatus, OperationType};
use crate::quarantine::Quarantine;
use serde::Serialize;
use std::path::Path;

/// Outcome of rolling back every member of a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    pub transaction_id: String,
    pub operations_rolled_back: usize,
    pub operations_failed: usize,
    pub success: bool,
    /// Ids reversed, in the order they were reversed
    pub rolled_back: Vec<i64>,
    /// The operation that stopped the rollback, with the reason
    pub failure: Option<(i64, String)>,
}

pub struct RollbackExecutor<'q> {
    quarantine: &'q Quarantine,
}

impl<'q> RollbackExecutor<'q> {
    pub fn new(quarantine: &'q Quarantine) -> Self {
        Self { quarantine }
    }

    pub fn rollback_operation(&self, op: &Operation) -> Result<()> {
        match op.operation_type {
            OperationType::Move => self.rollback_move(op),
            OperationType::Rename => self.rollback_rename(op),
            OperationType::Delete => self.rollback_delete(op),
            OperationType::Copy => self.rollback_copy(op),
            OperationType::Create => self.rollback_create(op),
        }
    }

    pub fn redo_operation(&self, op: &Operation) -> Result<()> {
        match op.operation_type {
            OperationType::Move => self.redo_move(op),
            OperationType::Rename => self.redo_rename(op),
            OperationType::Delete => self.redo_delete(op),
            OperationType::Copy => self.redo_copy(op),
            OperationType::Create => self.redo_create(op),
        }
    }

    pub fn rollback_move(&self, op: &Operation) -> Result<()> {
        let dest = destination(op)?;
        self.relocate(dest, &op.source_path)?;
        tracing::info!(
            "Rolled back move: {} -> {}",
            dest.display(),
            op.source_path.display()
        );
        Ok(())
    }

    pub fn rollback_rename(&self, op: &Operation) -> Result<()> {
        let dest = destination(op)?;
        self.relocate(dest, &op.source_path)?;
        tracing::info!(
            "Rolled back rename: {} -> {}",
            dest.display(),
            op.source_path.display()
        );
        Ok(())
    }

    pub fn rollback_delete(&self, op: &Operation) -> Result<()> {
        self.quarantine
            .restore(op.quarantine_key(), &op.source_path)?;
        tracing::info!("Restored deleted file {}", op.source_path.display());
        Ok(())
    }

    /// The copy goes to quarantine, not away for good
    pub fn rollback_copy(&self, op: &Operation) -> Result<()> {
        let dest = destination(op)?;
        self.quarantine.stash(op.quarantine_key(), dest)?;
        tracing::info!("Rolled back copy: quarantined {}", dest.display());
        Ok(())
    }

    pub fn rollback_create(&self, op: &Operation) -> Result<()> {
        self.quarantine
            .stash(op.quarantine_key(), &op.source_path)?;
        tracing::info!("Rolled back create: quarantined {}", op.source_path.display());
        Ok(())
    }

    pub fn redo_move(&self, op: &Operation) -> Result<()> {
        let dest = destination(op)?;
        self.relocate(&op.source_path, dest)?;
        tracing::info!("Redid move: {} -> {}", op.source_path.display(), dest.display());
        Ok(())
    }

    pub fn redo_rename(&self, op: &Operation) -> Result<()> {
        let dest = destination(op)?;
        self.relocate(&op.source_path, dest)?;
        tracing::info!("Redid rename: {} -> {}", op.source_path.display(), dest.display());
        Ok(())
    }

    pub fn redo_delete(&self, op: &Operation) -> Result<()> {
        self.quarantine
            .stash(op.quarantine_key(), &op.source_path)?;
        tracing::info!("Redid delete: quarantined {}", op.source_path.display());
        Ok(())
    }

    /// Recreate the copy from the source, then drop the stale quarantined one
    pub fn redo_copy(&self, op: &Operation) -> Result<()> {
        let dest = destination(op)?;
        require_present(&op.source_path)?;
        require_free(dest)?;

        copy_path(&op.source_path, dest)?;
        self.quarantine.discard(op.quarantine_key())?;
        tracing::info!("Redid copy: {} -> {}", op.source_path.display(), dest.display());
        Ok(())
    }

    pub fn redo_create(&self, op: &Operation) -> Result<()> {
        self.quarantine
            .restore(op.quarantine_key(), &op.source_path)?;
        tracing::info!("Redid create: restored {}", op.source_path.display());
        Ok(())
    }

    fn relocate(&self, from: &Path, to: &Path) -> Result<()> {
        require_present(from)?;
        require_free(to)?;
        self.quarantine.relocate(from, to)
    }

    /// Roll back the members of a transaction, newest first.
    ///
    /// Stops at the first operation whose inverse fails; operations already
    /// reversed stay reversed and the rest are left alone. Members that are
    /// ROLLED_BACK or FAILED are skipped without being counted.
    pub fn rollback_transaction(
        &self,
        transaction_id: &str,
        operations: &[Operation],
    ) -> RollbackReport {
        let mut pending: Vec<&Operation> = operations
            .iter()
            .filter(|op| op.status == OperationStatus::Completed)
            .collect();
        pending.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));

        let mut report = RollbackReport {
            transaction_id: transaction_id.to_string(),
            ..Default::default()
        };

        for op in pending {
            match self.rollback_operation(op) {
                Ok(()) => report.rolled_back.push(op.id),
                Err(e) => {
                    tracing::warn!(
                        "Rollback of transaction {} stopped at operation {}: {}",
                        transaction_id,
                        op.id,
                        e
                    );
                    report.failure = Some((op.id, e.to_string()));
                    break;
                }
            }
        }

        report.operations_rolled_back = report.rolled_back.len();
        report.operations_failed = usize::from(report.failure.is_some());
        report.success = report.failure.is_none();
        report
    }
}

fn destination(op: &Operation) -> Result<&Path> {
    op.destination_path.as_deref().ok_or_else(|| {
        JournalError::InvalidValue(format!(
            "{} operation {} has no destination path",
            op.operation_type, op.id
        ))
    })
}

fn require_present(path: &Path) -> Result<()> {
    if !path_exists(path) {
        return Err(JournalError::PathConflict(format!(
            "{} does not exist",
            path.display()
        )));
    }
    Ok(())
}

fn require_free(path: &Path) -> Result<()> {
    if path_exists(path) {
        return Err(JournalError::PathConflict(format!(
            "{} is occupied",
            path.display()
        )));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Journal;
    use crate::operation::NewOperation;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        temp_dir: TempDir,
        journal: Journal,
        quarantine: Quarantine,
    }

    fn setup() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        let journal = Journal::open(&data_dir).unwrap();
        let quarantine = Quarantine::for_data_dir(&data_dir);
        Fixture {
            temp_dir,
            journal,
            quarantine,
        }
    }

    impl Fixture {
        fn path(&self, name: &str) -> PathBuf {
            self.temp_dir.path().join(name)
        }

        fn logged(&self, op: NewOperation) -> Operation {
            let id = self.journal.log_operation(op).unwrap();
            self.journal.get_operation(id).unwrap().unwrap()
        }
    }

    #[test]
    fn test_move_rollback_and_redo() -> Result<()> {
        let fx = setup();
        let (src, dst) = (fx.path("in/a.txt"), fx.path("out/a.txt"));
        fs::create_dir_all(fx.path("out"))?;
        fs::write(&dst, b"moved")?;
        let op = fx.logged(NewOperation::new(OperationType::Move, &src).destination(&dst));
        let executor = RollbackExecutor::new(&fx.quarantine);

        executor.rollback_operation(&op)?;
        assert!(src.exists() && !dst.exists());

        executor.redo_operation(&op)?;
        assert!(!src.exists());
        assert_eq!(fs::read(&dst)?, b"moved");
        Ok(())
    }

    #[test]
    fn test_move_rollback_refuses_occupied_source() -> Result<()> {
        let fx = setup();
        let (src, dst) = (fx.path("a"), fx.path("b"));
        fs::write(&src, b"new tenant")?;
        fs::write(&dst, b"moved")?;
        let op = fx.logged(NewOperation::new(OperationType::Rename, &src).destination(&dst));

        let err = RollbackExecutor::new(&fx.quarantine)
            .rollback_operation(&op)
            .unwrap_err();
        assert!(matches!(err, JournalError::PathConflict(_)));
        assert_eq!(fs::read(&src)?, b"new tenant");
        Ok(())
    }

    #[test]
    fn test_delete_rollback_and_redo() -> Result<()> {
        let fx = setup();
        let file = fx.path("notes.md");
        fs::write(&file, b"# notes")?;
        let op = fx.logged(NewOperation::new(OperationType::Delete, &file));
        fx.quarantine.stash(op.id, &file)?;
        let executor = RollbackExecutor::new(&fx.quarantine);

        executor.rollback_delete(&op)?;
        assert_eq!(fs::read(&file)?, b"# notes");
        assert!(!fx.quarantine.contains(op.id));

        executor.redo_delete(&op)?;
        assert!(!file.exists());
        assert!(fx.quarantine.contains(op.id));
        Ok(())
    }

    #[test]
    fn test_copy_rollback_keeps_source_and_redo_discards_slot() -> Result<()> {
        let fx = setup();
        let (src, dst) = (fx.path("src.txt"), fx.path("dst.txt"));
        fs::write(&src, b"payload")?;
        fs::copy(&src, &dst)?;
        let op = fx.logged(NewOperation::new(OperationType::Copy, &src).destination(&dst));
        let executor = RollbackExecutor::new(&fx.quarantine);

        executor.rollback_copy(&op)?;
        assert!(src.exists());
        assert!(!dst.exists());
        assert!(fx.quarantine.contains(op.id));

        executor.redo_copy(&op)?;
        assert_eq!(fs::read(&dst)?, b"payload");
        assert!(!fx.quarantine.contains(op.id));
        Ok(())
    }

    #[test]
    fn test_create_rollback_and_redo() -> Result<()> {
        let fx = setup();
        let file = fx.path("draft.txt");
        fs::write(&file, b"draft")?;
        let op = fx.logged(NewOperation::new(OperationType::Create, &file));
        let executor = RollbackExecutor::new(&fx.quarantine);

        executor.rollback_create(&op)?;
        assert!(!file.exists());

        executor.redo_create(&op)?;
        assert_eq!(fs::read(&file)?, b"draft");
        Ok(())
    }

    #[test]
    fn test_repeated_rollback_does_not_overwrite_quarantine() -> Result<()> {
        let fx = setup();
        let file = fx.path("c.txt");
        fs::write(&file, b"first")?;
        let op = fx.logged(NewOperation::new(OperationType::Create, &file));
        let executor = RollbackExecutor::new(&fx.quarantine);

        executor.rollback_create(&op)?;
        fs::write(&file, b"second")?;
        assert!(executor.rollback_create(&op).is_err());

        let entry = fx.quarantine.entry_path(op.id).unwrap();
        assert_eq!(fs::read(entry)?, b"first");
        assert_eq!(fs::read(&file)?, b"second");
        Ok(())
    }

    #[test]
    fn test_rollback_transaction_partial_failure() -> Result<()> {
        let fx = setup();
        let txn = fx.journal.start_transaction(None)?;

        // B is logged first, so it is reversed last; its copy has vanished
        let b_src = fx.path("b_src.txt");
        let b_dst = fx.path("b_dst.txt");
        fs::write(&b_src, b"b")?;
        let b = fx.logged(
            NewOperation::new(OperationType::Copy, &b_src)
                .destination(&b_dst)
                .transaction(&txn),
        );

        let a_file = fx.path("a.txt");
        fs::write(&a_file, b"a")?;
        let a = fx.logged(NewOperation::new(OperationType::Create, &a_file).transaction(&txn));

        let report =
            RollbackExecutor::new(&fx.quarantine).rollback_transaction(&txn, &[b.clone(), a.clone()]);

        assert!(!report.success);
        assert_eq!(report.operations_rolled_back, 1);
        assert_eq!(report.operations_failed, 1);
        assert_eq!(report.rolled_back, vec![a.id]);
        assert_eq!(report.failure.as_ref().map(|f| f.0), Some(b.id));
        assert!(!a_file.exists());
        Ok(())
    }

    #[test]
    fn test_rollback_transaction_order_and_skips() -> Result<()> {
        let fx = setup();
        let txn = fx.journal.start_transaction(None)?;
        let first = fx.path("one");
        let second = fx.path("two");
        fs::write(&first, b"1")?;
        fs::write(&second, b"2")?;
        let op1 = fx.logged(NewOperation::new(OperationType::Create, &first).transaction(&txn));
        let op2 = fx.logged(NewOperation::new(OperationType::Create, &second).transaction(&txn));
        let failed = fx.logged(
            NewOperation::new(OperationType::Delete, fx.path("three"))
                .transaction(&txn)
                .failed("permission denied"),
        );

        let report = RollbackExecutor::new(&fx.quarantine)
            .rollback_transaction(&txn, &[op1.clone(), op2.clone(), failed]);

        assert!(report.success);
        assert_eq!(report.rolled_back, vec![op2.id, op1.id]);
        assert_eq!(report.operations_failed, 0);
        Ok(())
    }
}
