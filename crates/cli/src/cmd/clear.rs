//! Wipe the journal and the quarantine area

use crate::util::Session;
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(data_dir: Option<&Path>, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!(
            "This deletes all history and quarantined files and cannot be undone; rerun with --yes"
        );
    }

    let session = Session::writer(data_dir)?;
    let before = session.journal.store().row_counts()?;

    session.cleanup().clear_all(true)?;
    let purged = session.quarantine().purge_all()?;

    println!(
        "{} Cleared {} operations, {} transactions and {} quarantined entries",
        "✓".green(),
        before.operations,
        before.transactions,
        purged
    );
    Ok(())
}
