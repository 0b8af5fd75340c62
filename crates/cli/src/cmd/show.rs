//! Show one transaction and its operations

use crate::util::{self, Session};
use anyhow::{Context, Result};
use journal::TransactionStatus;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(data_dir: Option<&Path>, transaction_ref: &str) -> Result<()> {
    let session = Session::reader(data_dir)?
        .ok_or_else(|| anyhow::anyhow!("No operations journaled yet"))?;

    let transaction_id = util::resolve_transaction_ref(&session.journal, transaction_ref)?;
    let txn = session
        .journal
        .get_transaction(&transaction_id)?
        .with_context(|| format!("Transaction not found: {}", transaction_ref))?;

    let status = match txn.status {
        TransactionStatus::Active => txn.status.as_str().cyan().to_string(),
        TransactionStatus::Completed => txn.status.as_str().green().to_string(),
        TransactionStatus::Failed => txn.status.as_str().red().to_string(),
    };

    println!("{} {}", "transaction".yellow().bold(), txn.transaction_id.cyan());
    println!("{} {}", "Status:    ".dimmed(), status);
    println!(
        "{} {} ({})",
        "Started:   ".dimmed(),
        util::format_absolute_time(txn.started_at),
        util::format_relative_time(txn.started_at).dimmed()
    );
    if let Some(done) = txn.completed_at {
        println!("{} {}", "Finished:  ".dimmed(), util::format_absolute_time(done));
    }
    println!("{} {}", "Operations:".dimmed(), txn.operation_count);

    if !txn.metadata.is_empty() {
        println!("\n{}", "Metadata:".bold());
        for (key, value) in &txn.metadata {
            println!("  {}: {}", key, value);
        }
    }

    let operations = session.journal.transaction_operations(&txn.transaction_id)?;
    if !operations.is_empty() {
        println!("\n{}", "Operations:".bold());
        for op in &operations {
            util::display_operation(op);
        }
    }
    Ok(())
}
