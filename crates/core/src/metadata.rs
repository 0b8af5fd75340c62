//! File metadata captured alongside each journaled operation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Snapshot of a path's attributes at the moment it was journaled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Size in bytes (directory entry size for directories)
    pub size: u64,
    /// Unix permission bits; 0 on platforms without them
    pub mode: u32,
    /// Last modification time (Unix milliseconds), if the platform reports it
    pub modified_ms: Option<u64>,
    pub is_file: bool,
    pub is_dir: bool,
    pub is_symlink: bool,
}

impl FileMetadata {
    /// Capture metadata for `path` without following symlinks
    pub fn capture(path: &Path) -> Result<Self> {
        let meta = std::fs::symlink_metadata(path)
            .with_context(|| format!("Failed to read metadata for {}", path.display()))?;

        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);

        let file_type = meta.file_type();

        Ok(Self {
            size: meta.len(),
            mode: mode_bits(&meta),
            modified_ms,
            is_file: file_type.is_file(),
            is_dir: file_type.is_dir(),
            is_symlink: file_type.is_symlink(),
        })
    }
}

#[cfg(unix)]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(_meta: &std::fs::Metadata) -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_capture_regular_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("notes.md");
        std::fs::write(&path, b"12345")?;

        let meta = FileMetadata::capture(&path)?;
        assert_eq!(meta.size, 5);
        assert!(meta.is_file);
        assert!(!meta.is_dir);
        assert!(meta.modified_ms.is_some());
        Ok(())
    }

    #[test]
    fn test_capture_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let meta = FileMetadata::capture(temp_dir.path())?;
        assert!(meta.is_dir);
        assert!(!meta.is_file);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_capture_permission_bits() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("script.sh");
        std::fs::write(&path, b"#!/bin/sh\n")?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;

        assert_eq!(FileMetadata::capture(&path)?.mode, 0o755);
        Ok(())
    }

    #[test]
    fn test_capture_missing_path_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(FileMetadata::capture(&temp_dir.path().join("gone")).is_err());
    }
}
