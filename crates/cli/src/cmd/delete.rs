//! Delete a path reversibly by moving it into quarantine

use crate::util::{self, Session};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(data_dir: Option<&Path>, path: &Path, transaction: Option<&str>) -> Result<()> {
    let path = util::absolute_path(path)?;
    if path.symlink_metadata().is_err() {
        anyhow::bail!("Nothing to delete at {}", path.display());
    }

    let session = Session::writer(data_dir)?;
    let transaction = transaction
        .map(|reference| util::resolve_transaction_ref(&session.journal, reference))
        .transpose()?;

    let id = session
        .undo_manager()
        .quarantine_delete(&path, transaction.as_deref())
        .with_context(|| format!("Failed to quarantine {}", path.display()))?;
    println!("{} Quarantined {}", "✓".green(), path.display());

    if let Some(op) = session.journal.get_operation(id)? {
        util::display_operation(&op);
    }

    session.finish()?;
    Ok(())
}
