//! Writer lock for the journal
//!
//! Only one journaling client writes at a time. Readers never take the lock;
//! WAL mode lets them see committed state while a writer runs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const LOCK_FILE: &str = "locks/journal.lock";

/// Exclusive writer lock, released when dropped
#[derive(Debug)]
pub struct JournalLock {
    #[allow(dead_code)]
    file: File,
}

/// Lock file content
#[derive(Serialize, Deserialize)]
struct LockContent {
    pid: u32,
    acquired_at: i64,
}

impl JournalLock {
    /// Acquire the writer lock (non-blocking).
    ///
    /// Fails when another process holds it. The kernel drops an `flock` when
    /// its holder exits, so a crashed writer never leaves a stale lock.
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        let lock_path = data_dir.join(LOCK_FILE);

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create locks directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .context("Failed to open lock file")?;

        if !try_flock_exclusive(&file)? {
            match read_lock_content(&mut file) {
                Ok(holder) => anyhow::bail!(
                    "Journal is locked by another retrace process (pid {})",
                    holder.pid
                ),
                Err(_) => anyhow::bail!("Journal is locked by another retrace process"),
            }
        }

        write_lock_content(&mut file)?;
        tracing::debug!("Acquired journal lock at {}", lock_path.display());

        Ok(Self { file })
    }
}

fn write_lock_content(file: &mut File) -> Result<()> {
    let content = LockContent {
        pid: std::process::id(),
        acquired_at: chrono::Utc::now().timestamp_millis(),
    };

    let serialized =
        serde_json::to_string(&content).context("Failed to serialize lock content")?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn read_lock_content(file: &mut File) -> Result<LockContent> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).context("Failed to deserialize lock content")
}

/// Try to acquire exclusive file lock (non-blocking)
#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// No advisory locking off unix; a single writer is assumed
#[cfg(not(unix))]
fn try_flock_exclusive(_file: &File) -> Result<bool> {
    Ok(true)
}
