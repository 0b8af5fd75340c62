//! SQLite-backed datastore for operations and transactions
//!
//! The store runs in WAL mode so a read-only viewer can query the journal
//! while the journaling process writes. Every multi-row mutation goes through
//! [`Datastore::with_unit_of_work`], which commits all-or-nothing.

// SQLite hands back i64 for sizes and counts; they are never negative.
#![allow(clippy::cast_sign_loss)]

use crate::error::{JournalError, Result};
use crate::operation::{from_millis, Context, Operation, Transaction};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Schema SQL embedded at compile time
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Schema version written by this build
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Column list matching [`operation_from_row`]
pub(crate) const OPERATION_COLUMNS: &str = "id, operation_type, timestamp_ms, source_path, \
     destination_path, status, transaction_id, file_hash, metadata, error_message, rolled_back_at_ms";

/// Column list matching [`transaction_from_row`]
pub(crate) const TRANSACTION_COLUMNS: &str =
    "transaction_id, status, started_at_ms, completed_at_ms, operation_count, metadata";

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub operations: u64,
    pub transactions: u64,
}

/// Durable storage for the journal
pub struct Datastore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    read_only: bool,
}

impl Datastore {
    /// Open or create a store file, applying the schema on first use
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::initialize(&conn)?;

        tracing::debug!("Opened journal store at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
            read_only: false,
        })
    }

    /// Open an existing store for reading only.
    ///
    /// Readers never block the writer thanks to WAL; they see the last
    /// committed state.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        check_schema_version(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
            read_only: true,
        })
    }

    /// Create a throwaway store for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
            read_only: false,
        })
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // journal_mode answers with the mode actually in effect
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!("Journal store mode: {}", mode);

        conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;

        let version: Option<i64> =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    [CURRENT_SCHEMA_VERSION],
                )?;
                tracing::info!("Initialized journal schema v{}", CURRENT_SCHEMA_VERSION);
            }
            Some(found) if found > CURRENT_SCHEMA_VERSION => {
                return Err(JournalError::SchemaVersion {
                    found,
                    supported: CURRENT_SCHEMA_VERSION,
                });
            }
            Some(_) => {}
        }

        Ok(())
    }

    /// Run `f` inside one immediate transaction.
    ///
    /// Commits when `f` returns `Ok`; any error discards every write made
    /// inside the closure.
    pub fn with_unit_of_work<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run read-only queries against the connection
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Logical database size (page_count * page_size)
    pub fn size_bytes(&self) -> Result<u64> {
        self.read(|conn| {
            let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
            Ok((page_count * page_size) as u64)
        })
    }

    /// Bytes on disk across the store file and its WAL sidecars
    pub fn file_size_on_disk(&self) -> Result<u64> {
        let path = match &self.path {
            Some(p) => p,
            None => return self.size_bytes(),
        };

        let mut total = 0;
        for suffix in ["", "-wal", "-shm"] {
            let mut name = path.as_os_str().to_owned();
            name.push(suffix);
            if let Ok(meta) = std::fs::metadata(PathBuf::from(name)) {
                total += meta.len();
            }
        }
        Ok(total)
    }

    pub fn row_counts(&self) -> Result<RowCounts> {
        self.read(|conn| {
            let operations: i64 =
                conn.query_row("SELECT COUNT(*) FROM operations", [], |row| row.get(0))?;
            let transactions: i64 =
                conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
            Ok(RowCounts {
                operations: operations as u64,
                transactions: transactions as u64,
            })
        })
    }

    /// Reclaim free pages after deletions
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("VACUUM")?;
        tracing::debug!("Vacuumed journal store");
        Ok(())
    }

    /// Fold the WAL back into the main file and truncate it
    pub fn checkpoint_wal(&self) -> Result<()> {
        let conn = self.conn.lock();
        let (busy, _log, _checkpointed): (i64, i64, i64) =
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
        if busy != 0 {
            tracing::warn!("WAL checkpoint could not complete: readers are active");
        }
        Ok(())
    }

    pub fn is_wal_mode(&self) -> Result<bool> {
        self.read(|conn| {
            let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            Ok(mode.eq_ignore_ascii_case("wal"))
        })
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.read(|conn| {
            let version: Option<i64> =
                conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
            Ok(version.unwrap_or(0))
        })
    }
}

fn check_schema_version(conn: &Connection) -> Result<()> {
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    match version {
        Some(found) if found > CURRENT_SCHEMA_VERSION => Err(JournalError::SchemaVersion {
            found,
            supported: CURRENT_SCHEMA_VERSION,
        }),
        _ => Ok(()),
    }
}

fn parse_text<T: std::str::FromStr<Err = JournalError>>(
    idx: usize,
    raw: String,
) -> rusqlite::Result<T> {
    raw.parse().map_err(|e: JournalError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_context(idx: usize, raw: String) -> rusqlite::Result<Context> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_millis(idx: usize, ms: i64) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    from_millis(ms).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Integer, Box::new(e))
    })
}

/// Decode a row selected with [`OPERATION_COLUMNS`]
pub(crate) fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<Operation> {
    let rolled_back_at = match row.get::<_, Option<i64>>(10)? {
        Some(ms) => Some(parse_millis(10, ms)?),
        None => None,
    };

    Ok(Operation {
        id: row.get(0)?,
        operation_type: parse_text(1, row.get(1)?)?,
        timestamp: parse_millis(2, row.get(2)?)?,
        source_path: PathBuf::from(row.get::<_, String>(3)?),
        destination_path: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
        status: parse_text(5, row.get(5)?)?,
        transaction_id: row.get(6)?,
        file_hash: row.get(7)?,
        metadata: parse_context(8, row.get(8)?)?,
        error_message: row.get(9)?,
        rolled_back_at,
    })
}

/// Decode a row selected with [`TRANSACTION_COLUMNS`]
pub(crate) fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let completed_at = match row.get::<_, Option<i64>>(3)? {
        Some(ms) => Some(parse_millis(3, ms)?),
        None => None,
    };

    Ok(Transaction {
        transaction_id: row.get(0)?,
        status: parse_text(1, row.get(1)?)?,
        started_at: parse_millis(2, row.get(2)?)?,
        completed_at,
        operation_count: row.get(4)?,
        metadata: parse_context(5, row.get(5)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_enables_wal_and_schema() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = Datastore::open(&temp_dir.path().join("history.db"))?;

        assert!(store.is_wal_mode()?);
        assert_eq!(store.schema_version()?, CURRENT_SCHEMA_VERSION);
        assert_eq!(store.row_counts()?, RowCounts::default());
        Ok(())
    }

    #[test]
    fn test_reopen_keeps_single_version_row() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("history.db");
        drop(Datastore::open(&path)?);
        let store = Datastore::open(&path)?;

        let rows: i64 = store.read(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))?)
        })?;
        assert_eq!(rows, 1);
        Ok(())
    }

    #[test]
    fn test_newer_schema_is_rejected() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("history.db");
        {
            let store = Datastore::open(&path)?;
            store.with_unit_of_work(|tx| {
                tx.execute("UPDATE schema_version SET version = 99", [])?;
                Ok(())
            })?;
        }

        match Datastore::open(&path) {
            Err(JournalError::SchemaVersion { found: 99, .. }) => Ok(()),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("newer schema should be rejected"),
        }
    }

    #[test]
    fn test_failed_unit_of_work_leaves_no_rows() -> Result<()> {
        let store = Datastore::in_memory()?;

        let result: Result<()> = store.with_unit_of_work(|tx| {
            tx.execute(
                "INSERT INTO transactions (transaction_id, status, started_at_ms) VALUES ('t1', 'ACTIVE', 0)",
                [],
            )?;
            Err(JournalError::InvalidValue("abort".into()))
        });

        assert!(result.is_err());
        assert_eq!(store.row_counts()?.transactions, 0);
        Ok(())
    }

    #[test]
    fn test_reader_sees_committed_rows() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("history.db");
        let writer = Datastore::open(&path)?;
        writer.with_unit_of_work(|tx| {
            tx.execute(
                "INSERT INTO transactions (transaction_id, status, started_at_ms) VALUES ('t1', 'ACTIVE', 0)",
                [],
            )?;
            Ok(())
        })?;

        let reader = Datastore::open_read_only(&path)?;
        assert!(reader.is_read_only());
        assert_eq!(reader.row_counts()?.transactions, 1);
        Ok(())
    }

    #[test]
    fn test_size_and_vacuum() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = Datastore::open(&temp_dir.path().join("history.db"))?;

        assert!(store.size_bytes()? > 0);
        store.vacuum()?;
        store.checkpoint_wal()?;
        assert!(store.file_size_on_disk()? > 0);
        Ok(())
    }
}
