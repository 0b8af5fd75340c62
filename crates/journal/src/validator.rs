//! Pre-flight checks for undo and redo
//!
//! The validator only looks at the filesystem and the quarantine area; it
//! never changes either. A refusal comes back as a [`ValidationResult`] with
//! one [`Conflict`] per failed precondition.

use crate::fsutil::path_exists;
use crate::operation::{Operation, OperationStatus, OperationType};
use crate::quarantine::Quarantine;
use retrace_core::hash_file_auto;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Which way an operation is about to be replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// A path the inverse action needs to read is gone
    FileMissing,
    /// A path the inverse action needs to write is taken
    PathOccupied,
    /// The file no longer matches the hash recorded at log time
    FileModified,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::FileMissing => "FILE_MISSING",
            ConflictType::PathOccupied => "PATH_OCCUPIED",
            ConflictType::FileModified => "FILE_MODIFIED",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub conflict_type: ConflictType,
    pub path: PathBuf,
    pub detail: String,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.conflict_type, self.detail)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub can_proceed: bool,
    pub conflicts: Vec<Conflict>,
    /// Set for refusals that no change on disk can fix
    pub error_message: Option<String>,
}

impl ValidationResult {
    fn from_conflicts(conflicts: Vec<Conflict>) -> Self {
        Self {
            can_proceed: conflicts.is_empty(),
            conflicts,
            error_message: None,
        }
    }

    fn terminal(message: impl Into<String>) -> Self {
        Self {
            can_proceed: false,
            conflicts: Vec::new(),
            error_message: Some(message.into()),
        }
    }

    /// One line describing why the action was refused
    pub fn summary(&self) -> String {
        if let Some(msg) = &self.error_message {
            return msg.clone();
        }
        self.conflicts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Recompute the content hash of `path` and compare it with `expected_hash`
/// (hex). Unreadable files never match.
pub fn check_file_integrity(path: &Path, expected_hash: &str) -> bool {
    match hash_file_auto(path) {
        Ok(hash) => hash.to_hex().eq_ignore_ascii_case(expected_hash),
        Err(e) => {
            tracing::debug!("Integrity check could not hash {}: {:#}", path.display(), e);
            false
        }
    }
}

pub struct OperationValidator<'q> {
    quarantine: &'q Quarantine,
    verify_integrity: bool,
}

impl<'q> OperationValidator<'q> {
    pub fn new(quarantine: &'q Quarantine) -> Self {
        Self {
            quarantine,
            verify_integrity: false,
        }
    }

    /// Also refuse when the file about to be moved back was changed since it
    /// was logged
    pub fn with_integrity_check(mut self, enabled: bool) -> Self {
        self.verify_integrity = enabled;
        self
    }

    pub fn validate(&self, op: &Operation, direction: Direction) -> ValidationResult {
        match direction {
            Direction::Undo => self.validate_undo(op),
            Direction::Redo => self.validate_redo(op),
        }
    }

    pub fn validate_undo(&self, op: &Operation) -> ValidationResult {
        match op.status {
            OperationStatus::RolledBack => {
                return ValidationResult::terminal(format!(
                    "operation {} already rolled back",
                    op.id
                ))
            }
            OperationStatus::Failed => {
                return ValidationResult::terminal(format!("operation {} failed", op.id))
            }
            OperationStatus::Completed => {}
        }

        let mut checks = Checks::default();
        let key = op.quarantine_key();

        match op.operation_type {
            OperationType::Move | OperationType::Rename => {
                let Some(dest) = op.destination_path.as_deref() else {
                    return missing_destination(op);
                };
                checks.present(dest, "moved file");
                checks.free(&op.source_path, "original location");
                if self.verify_integrity {
                    checks.unchanged(dest, op.file_hash.as_deref());
                }
            }
            OperationType::Delete => match self.quarantine.entry_path(key) {
                Some(entry) => {
                    checks.free(&op.source_path, "original location");
                    if self.verify_integrity {
                        checks.unchanged(&entry, op.file_hash.as_deref());
                    }
                }
                None => checks.push(
                    ConflictType::FileMissing,
                    self.quarantine.root().join(key.to_string()),
                    format!("no quarantined copy for operation {}", key),
                ),
            },
            OperationType::Copy => {
                let Some(dest) = op.destination_path.as_deref() else {
                    return missing_destination(op);
                };
                checks.present(dest, "copy");
                self.check_slot_free(&mut checks, key);
            }
            OperationType::Create => {
                checks.present(&op.source_path, "created file");
                self.check_slot_free(&mut checks, key);
            }
        }

        ValidationResult::from_conflicts(checks.conflicts)
    }

    pub fn validate_redo(&self, op: &Operation) -> ValidationResult {
        match op.status {
            OperationStatus::Completed => {
                return ValidationResult::terminal(format!("operation {} not rolled back", op.id))
            }
            OperationStatus::Failed => {
                return ValidationResult::terminal(format!("operation {} failed", op.id))
            }
            OperationStatus::RolledBack => {}
        }

        let mut checks = Checks::default();
        let key = op.quarantine_key();

        match op.operation_type {
            OperationType::Move | OperationType::Rename | OperationType::Copy => {
                let Some(dest) = op.destination_path.as_deref() else {
                    return missing_destination(op);
                };
                checks.present(&op.source_path, "source");
                checks.free(dest, "destination");
            }
            OperationType::Delete => {
                checks.present(&op.source_path, "restored file");
                self.check_slot_free(&mut checks, key);
            }
            OperationType::Create => {
                match self.quarantine.entry_path(key) {
                    Some(entry) => {
                        if self.verify_integrity {
                            checks.unchanged(&entry, op.file_hash.as_deref());
                        }
                    }
                    None => checks.push(
                        ConflictType::FileMissing,
                        self.quarantine.root().join(key.to_string()),
                        format!("no quarantined copy for operation {}", key),
                    ),
                }
                checks.free(&op.source_path, "created path");
            }
        }

        ValidationResult::from_conflicts(checks.conflicts)
    }

    fn check_slot_free(&self, checks: &mut Checks, key: i64) {
        if let Some(entry) = self.quarantine.entry_path(key) {
            checks.push(
                ConflictType::PathOccupied,
                entry,
                format!("quarantine slot {} is already in use", key),
            );
        }
    }
}

fn missing_destination(op: &Operation) -> ValidationResult {
    ValidationResult::terminal(format!(
        "{} operation {} has no destination path",
        op.operation_type, op.id
    ))
}

#[derive(Default)]
struct Checks {
    conflicts: Vec<Conflict>,
}

impl Checks {
    fn push(&mut self, conflict_type: ConflictType, path: PathBuf, detail: String) {
        self.conflicts.push(Conflict {
            conflict_type,
            path,
            detail,
        });
    }

    fn present(&mut self, path: &Path, what: &str) {
        if !path_exists(path) {
            self.push(
                ConflictType::FileMissing,
                path.to_path_buf(),
                format!("{} {} does not exist", what, path.display()),
            );
        }
    }

    fn free(&mut self, path: &Path, what: &str) {
        if path_exists(path) {
            self.push(
                ConflictType::PathOccupied,
                path.to_path_buf(),
                format!("{} {} is occupied", what, path.display()),
            );
        }
    }

    fn unchanged(&mut self, path: &Path, expected: Option<&str>) {
        let Some(expected) = expected else { return };
        if !path.is_file() {
            return;
        }
        if !check_file_integrity(path, expected) {
            self.push(
                ConflictType::FileModified,
                path.to_path_buf(),
                format!("{} changed since it was logged", path.display()),
            );
        }
    }
}
