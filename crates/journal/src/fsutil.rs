//! Filesystem moves and copies used by quarantine and rollback

use crate::error::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use ulid::Ulid;
use walkdir::WalkDir;

/// Name prefix of the directories cross-device moves copy into
pub(crate) const STAGING_PREFIX: &str = ".retrace-staging-";

/// True if something (file, directory or dangling symlink) is at `path`
pub(crate) fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Bookkeeping for cross-device moves.
///
/// A move that cannot be a plain rename copies into a freshly created
/// staging directory, then renames the copy onto its target. Before the
/// copy starts, a record naming the staging directory is written under
/// `root`, so an interrupted move can be cleaned up by [`Self::sweep`].
pub(crate) struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// Move `from` to `to`, falling back to copy + remove across filesystems.
    ///
    /// `stage_in` must be on the same filesystem as `to`. The caller
    /// guarantees `to` does not exist. Parent directories of `to` are
    /// created as needed.
    pub(crate) fn move_path(&self, from: &Path, to: &Path, stage_in: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }

        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => {
                tracing::debug!(
                    "Cross-device move {} -> {}, copying",
                    from.display(),
                    to.display()
                );
                self.copy_staged(from, to, stage_in)?;
                remove_path(from)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Copy `from` into a new staging directory under `stage_in`, then
    /// rename the copy to `to`.
    fn copy_staged(&self, from: &Path, to: &Path, stage_in: &Path) -> Result<()> {
        let token = Ulid::new().to_string();
        let stage = stage_in.join(format!("{STAGING_PREFIX}{token}"));
        let record = self.root.join(&token);

        fs::create_dir_all(&self.root)?;
        fs::write(&record, path_to_bytes(&stage))?;

        fs::create_dir_all(stage_in)?;
        // create_dir refuses an existing path, so nothing already there is reused
        if let Err(e) = fs::create_dir(&stage) {
            let _ = fs::remove_file(&record);
            return Err(e.into());
        }

        let copy = stage.join("entry");
        let result = copy_path(from, &copy).and_then(|()| Ok(fs::rename(&copy, to)?));

        match fs::remove_dir_all(&stage) {
            Ok(()) => fs::remove_file(&record)?,
            Err(e) => tracing::warn!(
                "Could not remove staging directory {}: {} (recovery will retry)",
                stage.display(),
                e
            ),
        }
        result
    }

    /// Remove staging directories left by interrupted moves.
    /// Returns how many were removed.
    pub(crate) fn sweep(&self) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            // Staging directories inside the area are found through their records
            if !entry.file_type()?.is_file() {
                continue;
            }

            let record = entry.path();
            let stage = path_from_bytes(fs::read(&record)?);
            if is_staging_dir(&stage) && path_exists(&stage) {
                remove_path(&stage)?;
                tracing::info!("Recovery: removed incomplete copy {}", stage.display());
                removed += 1;
            }
            fs::remove_file(&record)?;
        }
        Ok(removed)
    }
}

/// Copy a file, symlink or directory tree from `from` to `to`
pub(crate) fn copy_path(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }

    let meta = fs::symlink_metadata(from)?;
    if !meta.is_dir() {
        copy_entry(from, to, &meta)?;
        return Ok(());
    }

    for entry in WalkDir::new(from) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = to.join(rel);

        let meta = entry.path().symlink_metadata()?;
        if meta.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            copy_entry(entry.path(), &target, &meta)?;
        }
    }
    Ok(())
}

fn copy_entry(from: &Path, to: &Path, meta: &fs::Metadata) -> Result<()> {
    #[cfg(unix)]
    if meta.file_type().is_symlink() {
        let link = fs::read_link(from)?;
        std::os::unix::fs::symlink(link, to)?;
        return Ok(());
    }
    #[cfg(not(unix))]
    let _ = meta;

    fs::copy(from, to)?;
    Ok(())
}

/// Remove a file, symlink or directory tree
pub(crate) fn remove_path(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

fn is_staging_dir(path: &Path) -> bool {
    path.file_name()
        .map_or(false, |n| n.to_string_lossy().starts_with(STAGING_PREFIX))
}

#[cfg(unix)]
fn path_to_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn path_to_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32)
}

#[cfg(not(unix))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}
