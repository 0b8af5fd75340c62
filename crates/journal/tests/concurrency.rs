//! Concurrent writers and readers against one journal

use journal::{Journal, NewOperation, OperationFilter, OperationType};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const THREADS: usize = 3;
const OPS_PER_THREAD: usize = 10;

#[test]
fn test_concurrent_standalone_logging() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let journal = Arc::new(Journal::open(temp_dir.path())?);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let writer = Arc::clone(&journal);
            thread::spawn(move || -> journal::Result<()> {
                for i in 0..OPS_PER_THREAD {
                    let path = PathBuf::from(format!("/tmp/t{t}/file{i}"));
                    writer.log(OperationType::Create, &path, None)?;
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }

    assert_eq!(
        journal.store().row_counts()?.operations,
        (THREADS * OPS_PER_THREAD) as u64
    );
    Ok(())
}

#[test]
fn test_concurrent_logging_into_shared_transaction() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let journal = Arc::new(Journal::open(temp_dir.path())?);
    let txn = journal.start_transaction(None)?;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let writer = Arc::clone(&journal);
            let txn = txn.clone();
            thread::spawn(move || -> journal::Result<()> {
                for i in 0..OPS_PER_THREAD {
                    writer.log_operation(
                        NewOperation::new(
                            OperationType::Move,
                            format!("/in/t{t}-{i}"),
                        )
                        .destination(format!("/out/t{t}-{i}"))
                        .transaction(txn.as_str()),
                    )?;
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }
    assert!(journal.commit_transaction(&txn)?);

    let t = journal.get_transaction(&txn)?.unwrap();
    assert_eq!(t.operation_count, (THREADS * OPS_PER_THREAD) as i64);
    assert_eq!(journal.transaction_operations(&txn)?.len(), THREADS * OPS_PER_THREAD);
    assert!(journal.verify_integrity()?.is_healthy());
    Ok(())
}

#[test]
fn test_reader_sees_committed_state_while_writer_runs() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let writer = Arc::new(Journal::open(temp_dir.path())?);
    writer.log(OperationType::Create, std::path::Path::new("/seed"), None)?;

    let reader = Journal::open_read_only(temp_dir.path())?;

    let handle = {
        let writer = Arc::clone(&writer);
        thread::spawn(move || -> journal::Result<()> {
            for i in 0..50 {
                writer.log(
                    OperationType::Create,
                    &PathBuf::from(format!("/w/{i}")),
                    None,
                )?;
            }
            Ok(())
        })
    };

    // Reads never fail while the writer is busy; they only grow
    let mut last = 0;
    for _ in 0..20 {
        let seen = reader.get_operations(&OperationFilter::new())?.len();
        assert!(seen >= last);
        last = seen;
    }

    handle.join().expect("writer thread panicked")?;
    assert_eq!(reader.get_operations(&OperationFilter::new())?.len(), 51);
    assert!(reader.log(OperationType::Create, std::path::Path::new("/ro"), None).is_err());
    Ok(())
}
