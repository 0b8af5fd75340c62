//! Shared utilities for CLI commands

use crate::locks::JournalLock;
use crate::system_config::{self, SystemConfig};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use journal::{
    recover_on_startup, sweep_quarantine, Journal, JournalCleanup, Operation, OperationStatus,
    Quarantine, RecoveryReport, UndoManager, DB_FILE_NAME,
};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

/// Resolve the data directory.
///
/// Precedence: `--data-dir` / `RETRACE_DIR` (merged by clap), the config
/// file's `storage.data_dir`, then the platform data directory.
pub fn resolve_data_dir(flag: Option<&Path>, config: &SystemConfig) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = &config.storage.data_dir {
        return Ok(dir.clone());
    }
    dirs::data_dir()
        .map(|d| d.join("retrace"))
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory; pass --data-dir"))
}

/// An open journal plus everything commands need around it
pub struct Session {
    pub data_dir: PathBuf,
    pub config: SystemConfig,
    pub journal: Journal,
    /// What startup recovery did; writers only
    pub recovery: Option<RecoveryReport>,
    // Declared last so the journal closes before the lock is released
    _lock: Option<JournalLock>,
}

impl Session {
    /// Open for reading without taking the writer lock.
    ///
    /// Returns `None` when nothing has been journaled yet.
    pub fn reader(data_dir: Option<&Path>) -> Result<Option<Self>> {
        let config = system_config::load()?;
        let data_dir = resolve_data_dir(data_dir, &config)?;

        if !data_dir.join(DB_FILE_NAME).exists() {
            tracing::debug!("No journal at {}", data_dir.display());
            return Ok(None);
        }

        let journal = Journal::open_read_only(&data_dir)
            .with_context(|| format!("Failed to open journal at {}", data_dir.display()))?;

        Ok(Some(Self {
            data_dir,
            config,
            journal,
            recovery: None,
            _lock: None,
        }))
    }

    /// Open for writing: take the writer lock, then recover from any
    /// interrupted run.
    pub fn writer(data_dir: Option<&Path>) -> Result<Self> {
        let config = system_config::load()?;
        let data_dir = resolve_data_dir(data_dir, &config)?;

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let lock = JournalLock::acquire(&data_dir)?;

        let journal = Journal::open(&data_dir)
            .with_context(|| format!("Failed to open journal at {}", data_dir.display()))?;

        let report = recover_on_startup(&journal, &Quarantine::for_data_dir(&data_dir))
            .context("Startup recovery failed")?;
        if !report.stale_transactions.is_empty() {
            eprintln!(
                "{} {} unfinished transaction(s) from an earlier run: {}",
                "warning:".yellow().bold(),
                report.stale_transactions.len(),
                report.stale_transactions.join(", ")
            );
        }

        Ok(Self {
            data_dir,
            config,
            journal,
            recovery: Some(report),
            _lock: Some(lock),
        })
    }

    pub fn quarantine(&self) -> Quarantine {
        Quarantine::for_data_dir(&self.data_dir)
    }

    pub fn undo_manager(&self) -> UndoManager<'_> {
        UndoManager::new(&self.journal, &self.data_dir)
            .with_integrity_check(self.config.storage.verify_integrity)
    }

    pub fn cleanup(&self) -> JournalCleanup<'_> {
        JournalCleanup::new(&self.journal, self.config.retention.to_retention_policy())
    }

    /// Apply the retention policy after a mutation
    pub fn finish(&self) -> Result<()> {
        let stats = self.cleanup().auto_cleanup()?;
        if stats.ran {
            let swept = sweep_quarantine(&self.journal, &self.quarantine())?;
            tracing::info!(
                "Auto cleanup removed {} operations and {} quarantine entries",
                stats.operations_deleted(),
                swept
            );
        }
        Ok(())
    }
}

/// Accept a full transaction id or a unique prefix of one
pub fn resolve_transaction_ref(journal: &Journal, reference: &str) -> Result<String> {
    if journal.get_transaction(reference)?.is_some() {
        return Ok(reference.to_string());
    }

    let upper = reference.to_ascii_uppercase();
    let matching: Vec<String> = journal
        .get_transactions(None, None)?
        .into_iter()
        .map(|t| t.transaction_id)
        .filter(|id| id.starts_with(&upper))
        .collect();

    match matching.len() {
        1 => Ok(matching[0].clone()),
        0 => anyhow::bail!("Unknown transaction: '{}'", reference),
        n => anyhow::bail!(
            "Ambiguous transaction prefix '{}': matches {} transactions",
            reference,
            n
        ),
    }
}

/// Journal paths are stored absolute so undo works from any directory
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    Ok(cwd.join(path))
}

/// Format timestamp as relative time ("2 hours ago")
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let seconds = (Utc::now() - ts).num_seconds();
    if seconds < 0 {
        return "in the future".to_string();
    }

    match seconds {
        s if s < 60 => format!("{} seconds ago", s),
        s if s < 3600 => format!("{} minutes ago", s / 60),
        s if s < 86400 => format!("{} hours ago", s / 3600),
        s if s < 604800 => format!("{} days ago", s / 86400),
        s => format!("{} weeks ago", s / 604800),
    }
}

/// Format timestamp as absolute time ("2024-01-03 14:30:00")
pub fn format_absolute_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// First 8 characters of a transaction id
pub fn short_id(transaction_id: &str) -> &str {
    transaction_id.get(..8).unwrap_or(transaction_id)
}

fn status_label(status: OperationStatus) -> String {
    let label = format!("{:<11}", status.as_str());
    match status {
        OperationStatus::Completed => label.green().to_string(),
        OperationStatus::Failed => label.red().to_string(),
        OperationStatus::RolledBack => label.yellow().to_string(),
    }
}

/// Describe what an operation touched ("a -> b" or just "a")
pub fn describe_paths(op: &Operation) -> String {
    match &op.destination_path {
        Some(dest) => format!("{} -> {}", op.source_path.display(), dest.display()),
        None => op.source_path.display().to_string(),
    }
}

/// Display an operation on one line
pub fn display_operation(op: &Operation) {
    let mut line = format!(
        "{:>6}  {:<6}  {}  {:<16}  {}",
        op.id.to_string().yellow(),
        op.operation_type.as_str(),
        status_label(op.status),
        format_relative_time(op.timestamp).dimmed(),
        describe_paths(op)
    );

    if let Some(txn) = &op.transaction_id {
        line.push_str(&format!("  {}", format!("[{}]", short_id(txn)).cyan()));
    }
    if let Some(redo_of) = op.redo_of() {
        line.push_str(&format!("  {}", format!("(redo of #{})", redo_of).dimmed()));
    }
    println!("{}", line);

    if let Some(err) = &op.error_message {
        println!("{:>8}{}", "", err.red());
    }
}
