//! Re-apply undone operations

use super::{report_outcome, Target};
use crate::util::{self, Session};
use anyhow::Result;
use journal::{Operation, OperationStatus, OperationValidator};
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(data_dir: Option<&Path>, target: Target, dry_run: bool) -> Result<()> {
    if dry_run {
        return preview(data_dir, target);
    }

    let session = Session::writer(data_dir)?;
    let manager = session.undo_manager();

    let outcome = match &target {
        Target::Last => manager.redo_last_operation()?,
        Target::Operation(id) => manager.redo_operation(*id)?,
        Target::Transaction(reference) => {
            let txn = util::resolve_transaction_ref(&session.journal, reference)?;
            manager.redo_transaction(&txn)?
        }
    };

    let result = report_outcome("redone", &outcome);
    session.finish()?;
    result
}

/// Show what a redo would do without touching anything
fn preview(data_dir: Option<&Path>, target: Target) -> Result<()> {
    let Some(session) = Session::reader(data_dir)? else {
        println!("{}", "Nothing to redo".dimmed());
        return Ok(());
    };
    let redone = session.journal.redone_operation_ids()?;
    let quarantine = session.quarantine();
    let validator = OperationValidator::new(&quarantine)
        .with_integrity_check(session.config.storage.verify_integrity);

    let operations: Vec<Operation> = match &target {
        Target::Last => session.undo_manager().redo_stack(1)?,
        Target::Operation(id) => session
            .journal
            .get_operation(*id)?
            .into_iter()
            .collect(),
        Target::Transaction(reference) => {
            let txn = util::resolve_transaction_ref(&session.journal, reference)?;
            session
                .journal
                .transaction_operations(&txn)?
                .into_iter()
                .filter(|op| op.status == OperationStatus::RolledBack && !redone.contains(&op.id))
                .collect()
        }
    };

    if operations.is_empty() {
        println!("{}", "Nothing to redo".dimmed());
        return Ok(());
    }

    println!("{}", "Would redo:".bold());
    for op in &operations {
        util::display_operation(op);
        if matches!(target, Target::Transaction(_)) {
            continue;
        }
        if redone.contains(&op.id) {
            println!("{:>8}{} already redone", "", "blocked:".red());
            continue;
        }
        let validation = validator.validate_redo(op);
        if !validation.can_proceed {
            println!("{:>8}{} {}", "", "blocked:".red(), validation.summary());
        }
    }
    Ok(())
}
