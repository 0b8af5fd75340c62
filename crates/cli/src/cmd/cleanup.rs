//! Apply retention limits

use crate::util::{self, Session};
use anyhow::Result;
use journal::{sweep_quarantine, CleanupStats};
use owo_colors::OwoColorize;
use std::path::Path;

#[derive(Debug, Default)]
pub struct CleanupOptions {
    pub auto: bool,
    pub max_operations: Option<u64>,
    pub max_age_days: Option<u32>,
    pub failed_days: Option<u32>,
    pub rolled_back_days: Option<u32>,
    pub orphans: bool,
    pub quarantine: bool,
}

impl CleanupOptions {
    fn is_targeted(&self) -> bool {
        self.max_operations.is_some()
            || self.max_age_days.is_some()
            || self.failed_days.is_some()
            || self.rolled_back_days.is_some()
            || self.orphans
            || self.quarantine
    }
}

pub fn run(data_dir: Option<&Path>, options: CleanupOptions) -> Result<()> {
    let session = Session::writer(data_dir)?;
    let cleanup = session.cleanup();

    println!("{}", "Running journal cleanup...".bold());
    println!();

    let mut stats = CleanupStats::default();
    let mut swept = 0;

    if options.auto || !options.is_targeted() {
        // A bare `cleanup` runs every step even when under the limits
        stats = if options.auto {
            cleanup.auto_cleanup()?
        } else {
            cleanup.run_all()?
        };
        swept = sweep_quarantine(&session.journal, &session.quarantine())?;
    } else {
        if let Some(days) = options.max_age_days {
            stats.old_operations = cleanup.cleanup_old_operations(days)?;
        }
        if let Some(max) = options.max_operations {
            stats.excess_operations = cleanup.cleanup_by_count(max)?;
        }
        if let Some(days) = options.failed_days {
            stats.failed_operations = cleanup.cleanup_failed_operations(days)?;
        }
        if let Some(days) = options.rolled_back_days {
            stats.rolled_back_operations = cleanup.cleanup_rolled_back_operations(days)?;
        }
        if options.orphans {
            stats.orphaned_transactions = cleanup.cleanup_orphaned_transactions()?;
        }
        if options.quarantine {
            swept = sweep_quarantine(&session.journal, &session.quarantine())?;
        }
    }

    println!("{}", "Cleanup Complete".green().bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    if stats.operations_deleted() == 0 && stats.orphaned_transactions == 0 && swept == 0 {
        println!("{}", "Nothing to remove - journal is within its limits".dimmed());
        return Ok(());
    }

    println!("Expired operations:     {}", stats.old_operations.to_string().yellow());
    println!("Over count limit:       {}", stats.excess_operations.to_string().yellow());
    println!("Failed operations:      {}", stats.failed_operations.to_string().yellow());
    println!("Rolled-back operations: {}", stats.rolled_back_operations.to_string().yellow());
    println!("Over size limit:        {}", stats.size_operations.to_string().yellow());
    println!("Orphaned transactions:  {}", stats.orphaned_transactions.to_string().yellow());
    println!("Quarantine entries:     {}", swept.to_string().yellow());
    println!();
    println!(
        "Database size:          {}",
        util::format_size(session.journal.store().size_bytes()?).green()
    );
    Ok(())
}

