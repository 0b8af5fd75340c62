//! Integration tests for journal crate

use journal::{
    Journal, JournalCleanup, JournalError, NewOperation, OperationFilter, OperationStatus,
    OperationType, RetentionPolicy, RollbackExecutor, TransactionStatus, UndoManager,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Workspace {
    temp_dir: TempDir,
    data_dir: PathBuf,
}

impl Workspace {
    fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let data_dir = temp_dir.path().join(".retrace");
        fs::create_dir_all(temp_dir.path().join("files"))?;
        Ok(Self { temp_dir, data_dir })
    }

    fn file(&self, rel: &str) -> PathBuf {
        self.temp_dir.path().join("files").join(rel)
    }

    fn write(&self, rel: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.file(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }
}

/// Move a file the way an organizer would, journaling it inside `scope`
fn organize(scope: &journal::TransactionScope<'_>, from: &Path, to: &Path) -> anyhow::Result<i64> {
    fs::create_dir_all(to.parent().unwrap())?;
    let id = scope.log_move(from, to)?;
    fs::rename(from, to)?;
    Ok(id)
}

#[test]
fn test_full_undo_redo_lifecycle() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let journal = Journal::open(&ws.data_dir)?;
    let manager = UndoManager::new(&journal, &ws.data_dir);

    let invoice = ws.write("Downloads/invoice.pdf", b"%PDF invoice")?;
    let photo = ws.write("Downloads/IMG_0001.jpg", b"jpeg bytes")?;
    let junk = ws.write("Downloads/setup.tmp", b"junk")?;

    let mut scope = journal.begin(None)?;
    let filed_invoice = ws.file("Finance/2024/invoice.pdf");
    let filed_photo = ws.file("Photos/2024/beach.jpg");
    organize(&scope, &invoice, &filed_invoice)?;
    organize(&scope, &photo, &filed_photo)?;
    let txn = scope.transaction_id().unwrap().to_string();
    manager.quarantine_delete(&junk, Some(txn.as_str()))?;
    assert!(scope.commit()?);

    let t = journal.get_transaction(&txn)?.unwrap();
    assert_eq!(t.status, TransactionStatus::Completed);
    assert_eq!(t.operation_count, 3);
    assert!(!junk.exists());

    // Undo the whole batch
    let outcome = manager.undo_transaction(&txn)?;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.operations_affected, 3);
    assert_eq!(fs::read(&invoice)?, b"%PDF invoice");
    assert_eq!(fs::read(&photo)?, b"jpeg bytes");
    assert_eq!(fs::read(&junk)?, b"junk");
    assert!(!filed_invoice.exists());

    let ops = journal.transaction_operations(&txn)?;
    assert!(ops.iter().all(|op| op.status == OperationStatus::RolledBack));

    // And apply it again
    let outcome = manager.redo_transaction(&txn)?;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.operations_affected, 3);
    assert!(filed_invoice.exists() && filed_photo.exists());
    assert!(!junk.exists());

    // The redo records are undoable like anything else
    let last = manager.undo_last_operation()?;
    assert!(last.success, "{}", last.message);
    assert_eq!(fs::read(&junk)?, b"junk");
    Ok(())
}

#[test]
fn test_journal_survives_reopen() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let created = ws.write("notes.txt", b"hello")?;

    let id = {
        let journal = Journal::open(&ws.data_dir)?;
        journal.log(OperationType::Create, &created, None)?
    };

    let journal = Journal::open(&ws.data_dir)?;
    let op = journal.get_operation(id)?.unwrap();
    assert_eq!(op.source_path, created);
    assert!(op.file_hash.is_some());

    let manager = UndoManager::new(&journal, &ws.data_dir);
    assert!(manager.undo_operation(id)?.success);
    assert!(!created.exists());

    drop(manager);
    drop(journal);

    let journal = Journal::open(&ws.data_dir)?;
    let manager = UndoManager::new(&journal, &ws.data_dir);
    assert!(manager.redo_operation(id)?.success);
    assert_eq!(fs::read(&created)?, b"hello");
    Ok(())
}

#[test]
fn test_move_and_copy_properties() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let journal = Journal::open(&ws.data_dir)?;
    let manager = UndoManager::new(&journal, &ws.data_dir);

    let src = ws.write("a/report.docx", b"report")?;
    let dst = ws.file("b/report.docx");
    fs::create_dir_all(dst.parent().unwrap())?;
    fs::rename(&src, &dst)?;
    let moved = journal.log(OperationType::Move, &src, Some(dst.as_path()))?;

    assert!(manager.undo_operation(moved)?.success);
    assert!(src.exists() && !dst.exists());
    assert!(manager.redo_operation(moved)?.success);
    assert!(!src.exists() && dst.exists());

    let copy = ws.file("backup/report.docx");
    fs::create_dir_all(copy.parent().unwrap())?;
    fs::copy(&dst, &copy)?;
    let copied = journal.log(OperationType::Copy, &dst, Some(copy.as_path()))?;

    assert!(manager.undo_operation(copied)?.success);
    assert!(!copy.exists());
    assert_eq!(fs::read(&dst)?, b"report");
    assert!(manager.quarantine().contains(copied));
    Ok(())
}

#[test]
fn test_partial_transaction_rollback() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let journal = Journal::open(&ws.data_dir)?;
    let manager = UndoManager::new(&journal, &ws.data_dir);

    let mut scope = journal.begin(None)?;
    // Logged first, so reversed last: its copy will be gone
    let b_src = ws.write("b.txt", b"b")?;
    let b_dst = ws.file("b-copy.txt");
    fs::copy(&b_src, &b_dst)?;
    let b = scope.log_copy(&b_src, &b_dst)?;
    let a = ws.write("a.txt", b"a")?;
    let a_id = scope.log_create(&a)?;
    let txn = scope.transaction_id().unwrap().to_string();
    scope.commit()?;

    fs::remove_file(&b_dst)?;

    let ops = journal.transaction_operations(&txn)?;
    let quarantine = journal::Quarantine::for_data_dir(&ws.data_dir);
    let report = RollbackExecutor::new(&quarantine).rollback_transaction(&txn, &ops);
    assert!(!report.success);
    assert_eq!(report.operations_rolled_back, 1);
    assert_eq!(report.operations_failed, 1);
    assert_eq!(report.failure.map(|(id, _)| id), Some(b));
    assert!(!a.exists());
    assert!(quarantine.contains(a_id));

    // Through the manager the reversed operation is also recorded
    let mut scope = journal.begin(None)?;
    let c = ws.write("c.txt", b"c")?;
    let d_src = ws.write("d.txt", b"d")?;
    let d_id = scope.log_copy(&d_src, ws.file("missing-copy.txt"))?;
    let c_id = scope.log_create(&c)?;
    let txn2 = scope.transaction_id().unwrap().to_string();
    scope.commit()?;

    let outcome = manager.undo_transaction(&txn2)?;
    assert!(!outcome.success);
    assert_eq!(outcome.operations_affected, 1);
    assert_eq!(
        journal.get_operation(c_id)?.unwrap().status,
        OperationStatus::RolledBack
    );
    assert_eq!(
        journal.get_operation(d_id)?.unwrap().status,
        OperationStatus::Completed
    );
    Ok(())
}

#[test]
fn test_scope_closure_rolls_back_on_error() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let journal = Journal::open(&ws.data_dir)?;
    let mut txn_id = String::new();

    let result: Result<(), JournalError> = journal.transaction(None, |scope| {
        txn_id = scope.transaction_id().unwrap().to_string();
        scope.log_create(ws.file("half-done.txt"))?;
        Err(JournalError::PathConflict("target vanished".into()))
    });
    assert!(result.is_err());

    let txn = journal.get_transaction(&txn_id)?.unwrap();
    assert_eq!(txn.status, TransactionStatus::Failed);
    let ops = journal.get_operations(&OperationFilter::new().transaction_id(&txn_id))?;
    assert_eq!(ops[0].status, OperationStatus::RolledBack);
    Ok(())
}

#[test]
fn test_retention_by_count() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let journal = Journal::open(&ws.data_dir)?;

    let ops: Vec<NewOperation> = (0..150)
        .map(|i| NewOperation::new(OperationType::Create, ws.file(&format!("gen/{i}.txt"))))
        .collect();
    journal.log_batch(ops)?;

    let cleanup = JournalCleanup::new(&journal, RetentionPolicy::default());
    let deleted = cleanup.cleanup_by_count(100)?;
    assert!(deleted >= 40);
    assert!(journal.store().row_counts()?.operations <= 101);
    Ok(())
}

#[test]
fn test_empty_commit_is_orphaned() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let journal = Journal::open(&ws.data_dir)?;

    let mut scope = journal.begin(None)?;
    let txn = scope.transaction_id().unwrap().to_string();
    scope.commit()?;
    assert_eq!(journal.get_transaction(&txn)?.unwrap().operation_count, 0);

    let cleanup = JournalCleanup::new(&journal, RetentionPolicy::default());
    assert_eq!(cleanup.cleanup_orphaned_transactions()?, 1);
    assert!(journal.get_transaction(&txn)?.is_none());
    Ok(())
}

#[test]
fn test_statistics() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let journal = Journal::open(&ws.data_dir)?;

    journal.log(OperationType::Create, &ws.file("x"), None)?;
    journal.log_operation(
        NewOperation::new(OperationType::Delete, ws.file("y")).failed("permission denied"),
    )?;
    let undone = journal.log(OperationType::Create, &ws.file("z"), None)?;
    journal.mark_rolled_back(undone)?;
    journal.start_transaction(None)?;

    let stats = journal.statistics()?;
    assert_eq!(stats.total_operations, 3);
    assert_eq!(stats.operations_completed, 1);
    assert_eq!(stats.operations_failed, 1);
    assert_eq!(stats.operations_rolled_back, 1);
    assert_eq!(stats.total_transactions, 1);
    assert_eq!(stats.active_transactions, 1);
    assert!(stats.database_size > 0);
    assert!(stats.oldest_operation <= stats.newest_operation);
    Ok(())
}
