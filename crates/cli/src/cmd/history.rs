//! Display the operation history

use crate::util::{self, Session};
use anyhow::Result;
use journal::{OperationFilter, OperationStatus, OperationType};
use owo_colors::OwoColorize;
use std::path::Path;

pub struct HistoryOptions {
    pub limit: usize,
    pub operation_type: Option<String>,
    pub status: Option<String>,
    pub transaction: Option<String>,
}

impl HistoryOptions {
    fn filter(&self) -> Result<OperationFilter> {
        let mut filter = OperationFilter::recent(self.limit);
        if let Some(ty) = &self.operation_type {
            filter = filter.operation_type(ty.parse::<OperationType>()?);
        }
        if let Some(status) = &self.status {
            filter = filter.status(status.parse::<OperationStatus>()?);
        }
        if let Some(txn) = &self.transaction {
            filter = filter.transaction_id(txn.as_str());
        }
        Ok(filter)
    }
}

pub fn run(data_dir: Option<&Path>, options: HistoryOptions) -> Result<()> {
    let filter = options.filter()?;

    let Some(session) = Session::reader(data_dir)? else {
        println!("{}", "No operations journaled yet".dimmed());
        return Ok(());
    };

    let operations = session.journal.get_operations(&filter)?;
    if operations.is_empty() {
        println!("{}", "No matching operations".dimmed());
        return Ok(());
    }

    println!(
        "{:>6}  {:<6}  {:<11}  {:<16}  {}",
        "ID".bold(),
        "TYPE".bold(),
        "STATUS".bold(),
        "WHEN".bold(),
        "PATHS".bold()
    );
    for op in &operations {
        util::display_operation(op);
    }

    if operations.len() == options.limit {
        println!();
        println!(
            "{}",
            format!("Showing the {} most recent; use --limit for more", options.limit).dimmed()
        );
    }
    Ok(())
}
