//! Reverse journaled operations

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
        Target::Last => manager.undo_last_operation()?,
        Target::Operation(id) => manager.undo_operation(*id)?,
        Target::Transaction(reference) => {
            let txn = util::resolve_transaction_ref(&session.journal, reference)?;
            manager.undo_transaction(&txn)?
        }
    };

    let result = report_outcome("undone", &outcome);
    session.finish()?;
    result
}

/// Show what an undo would do without touching anything
fn preview(data_dir: Option<&Path>, target: Target) -> Result<()> {
    let Some(session) = Session::reader(data_dir)? else {
        println!("{}", "Nothing to undo".dimmed());
        return Ok(());
    };
    let quarantine = session.quarantine();
    let validator = OperationValidator::new(&quarantine)
        .with_integrity_check(session.config.storage.verify_integrity);

    let operations: Vec<Operation> = match &target {
        Target::Last => session.undo_manager().undo_stack(1)?,
        Target::Operation(id) => session
            .journal
            .get_operation(*id)?
            .into_iter()
            .collect(),
        Target::Transaction(reference) => {
            let txn = util::resolve_transaction_ref(&session.journal, reference)?;
            let mut ops: Vec<Operation> = session
                .journal
                .transaction_operations(&txn)?
                .into_iter()
                .filter(|op| op.status == OperationStatus::Completed)
                .collect();
            ops.sort_by_key(|op| std::cmp::Reverse((op.timestamp, op.id)));
            ops
        }
    };

    if operations.is_empty() {
        println!("{}", "Nothing to undo".dimmed());
        return Ok(());
    }

    println!("{}", "Would undo:".bold());
    for op in &operations {
        util::display_operation(op);
        // Members of a transaction can depend on one another, so only a
        // single operation gets a full pre-flight check
        if !matches!(target, Target::Transaction(_)) {
            let validation = validator.validate_undo(op);
            if !validation.can_proceed {
                println!("{:>8}{} {}", "", "blocked:".red(), validation.summary());
            }
        }
    }
    Ok(())
}
