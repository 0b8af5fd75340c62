//! Journal statistics

use crate::util::{self, Session};
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(data_dir: Option<&Path>) -> Result<()> {
    let Some(session) = Session::reader(data_dir)? else {
        println!("{}", "No operations journaled yet".dimmed());
        return Ok(());
    };

    let stats = session.journal.statistics()?;
    let on_disk = session.journal.store().file_size_on_disk()?;
    let quarantined = session.quarantine().keys()?.len();
    let policy = session.config.retention.to_retention_policy();

    println!("{}", "Journal".bold());
    println!("  Location:       {}", session.data_dir.display());
    println!("  Operations:     {}", stats.total_operations);
    println!("    completed:    {}", stats.operations_completed.to_string().green());
    println!("    failed:       {}", stats.operations_failed.to_string().red());
    println!("    rolled back:  {}", stats.operations_rolled_back.to_string().yellow());
    println!("  Transactions:   {}", stats.total_transactions);
    if stats.active_transactions > 0 {
        println!("    active:       {}", stats.active_transactions.to_string().cyan());
    }
    println!("  Quarantined:    {}", quarantined);
    println!();

    println!("{}", "Storage".bold());
    println!("  Database size:  {}", util::format_size(stats.database_size));
    println!("  On disk:        {}", util::format_size(on_disk));
    if let (Some(oldest), Some(newest)) = (stats.oldest_operation, stats.newest_operation) {
        println!(
            "  Span:           {} .. {}",
            util::format_absolute_time(oldest),
            util::format_absolute_time(newest)
        );
    }
    println!();

    println!("{}", "Retention".bold());
    println!(
        "  Limits:         {} operations, {} days, {}",
        policy.max_operations,
        policy.max_age_days,
        util::format_size(policy.max_size_bytes)
    );
    let auto = if policy.auto_cleanup_enabled {
        "enabled".green().to_string()
    } else {
        "disabled".dimmed().to_string()
    };
    println!("  Auto cleanup:   {}", auto);
    if session.cleanup().should_cleanup()? {
        println!("  {}", "Limits exceeded; cleanup will run on the next change".yellow());
    }
    Ok(())
}
