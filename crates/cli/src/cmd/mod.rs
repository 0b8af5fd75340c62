//! CLI command implementations

pub mod cleanup;
pub mod clear;
pub mod config;
pub mod delete;
pub mod history;
pub mod record;
pub mod redo;
pub mod show;
pub mod stats;
pub mod undo;
pub mod verify;

use journal::UndoOutcome;
use owo_colors::OwoColorize;

/// What an undo or redo applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The most recent eligible operation
    Last,
    Operation(i64),
    Transaction(String),
}

impl Target {
    pub fn from_args(operation: Option<i64>, transaction: Option<String>) -> Self {
        match (operation, transaction) {
            (Some(id), _) => Target::Operation(id),
            (None, Some(txn)) => Target::Transaction(txn),
            (None, None) => Target::Last,
        }
    }
}

/// Print an undo/redo outcome; a refusal or failure becomes an error
pub(crate) fn report_outcome(verb: &str, outcome: &UndoOutcome) -> anyhow::Result<()> {
    if outcome.success {
        println!("{} {}", "✓".green(), outcome.message);
        return Ok(());
    }

    if outcome.operations_affected > 0 {
        println!(
            "{} {} operation(s) were {} before the failure",
            "!".yellow().bold(),
            outcome.operations_affected,
            verb
        );
    }
    for conflict in &outcome.conflicts {
        println!(
            "  {} {} {}",
            conflict.conflict_type.as_str().red(),
            conflict.path.display(),
            conflict.detail.dimmed()
        );
    }
    anyhow::bail!("{}", outcome.message)
}
