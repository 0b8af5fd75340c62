//! Quarantine (trash) area that makes deletions reversible
//!
//! Layout:
//! ```text
//! <data_dir>/trash/
//!   <key>/
//!     <original file name>
//! ```
//! The key is the id of the operation that put the file there. A slot holds
//! at most one entry; stashing into an occupied slot is refused so a repeated
//! rollback can never overwrite a copy that is still needed.
//!
//! `trash/.staging/` holds the bookkeeping of cross-device moves. Slots only
//! ever hold complete entries, whatever their names.

use crate::error::{JournalError, Result};
use crate::fsutil::{path_exists, remove_path, StagingArea};
use std::fs;
use std::path::{Path, PathBuf};

pub struct Quarantine {
    root: PathBuf,
    staging: StagingArea,
}

impl Quarantine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let staging = StagingArea::new(root.join(".staging"));
        Self { root, staging }
    }

    /// The quarantine area belonging to a journal data directory
    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("trash"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_dir(&self, key: i64) -> PathBuf {
        self.root.join(key.to_string())
    }

    /// Path of the entry held in slot `key`, if any
    pub fn entry_path(&self, key: i64) -> Option<PathBuf> {
        let mut entries = fs::read_dir(self.slot_dir(key)).ok()?;
        entries.find_map(|e| e.ok()).map(|e| e.path())
    }

    pub fn contains(&self, key: i64) -> bool {
        self.entry_path(key).is_some()
    }

    /// Move `path` into slot `key`, keeping its file name
    pub fn stash(&self, key: i64, path: &Path) -> Result<PathBuf> {
        if !path_exists(path) {
            return Err(JournalError::Quarantine(format!(
                "nothing to quarantine at {}",
                path.display()
            )));
        }
        if let Some(existing) = self.entry_path(key) {
            return Err(JournalError::Quarantine(format!(
                "slot {} already holds {}",
                key,
                existing.display()
            )));
        }

        let file_name = path.file_name().ok_or_else(|| {
            JournalError::Quarantine(format!("{} has no file name", path.display()))
        })?;
        let target = self.slot_dir(key).join(file_name);

        self.staging
            .move_path(path, &target, self.staging.root())?;
        tracing::debug!("Quarantined {} as slot {}", path.display(), key);
        Ok(target)
    }

    /// Move the entry in slot `key` back out to `destination`
    pub fn restore(&self, key: i64, destination: &Path) -> Result<()> {
        let entry = self.entry_path(key).ok_or_else(|| {
            JournalError::Quarantine(format!("slot {} is empty", key))
        })?;
        if path_exists(destination) {
            return Err(JournalError::Quarantine(format!(
                "restore target {} is occupied",
                destination.display()
            )));
        }

        self.relocate(&entry, destination)?;

        // Best effort: the slot directory is empty now
        let _ = fs::remove_dir(self.slot_dir(key));

        tracing::debug!("Restored slot {} to {}", key, destination.display());
        Ok(())
    }

    /// Permanently delete slot `key`. Returns false if it did not exist.
    pub fn discard(&self, key: i64) -> Result<bool> {
        let slot = self.slot_dir(key);
        if !path_exists(&slot) {
            return Ok(false);
        }
        remove_path(&slot)?;
        Ok(true)
    }

    /// Keys of all slots currently present
    pub fn keys(&self) -> Result<Vec<i64>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(key) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i64>().ok())
            {
                keys.push(key);
            }
        }
        keys.sort_unstable();
        Ok(keys)
    }

    /// Delete every slot. Returns how many were removed.
    pub fn purge_all(&self) -> Result<usize> {
        let keys = self.keys()?;
        for &key in &keys {
            self.discard(key)?;
        }
        Ok(keys.len())
    }

    /// Move `from` to `to` outside the quarantine area.
    /// Cross-device copies are staged next to `to`.
    pub(crate) fn relocate(&self, from: &Path, to: &Path) -> Result<()> {
        let stage_in = to
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        self.staging.move_path(from, to, stage_in)
    }

    /// Remove copies left by interrupted cross-device moves
    pub fn remove_partials(&self) -> Result<usize> {
        self.staging.sweep()
    }
}
