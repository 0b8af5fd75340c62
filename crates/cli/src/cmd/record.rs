//! Journal an operation carried out by another tool
//!
//! Only the journal is written; the filesystem is left as it is.

use crate::util::{self, Session};
use anyhow::Result;
use journal::{NewOperation, OperationType};
use std::path::{Path, PathBuf};

pub struct RecordOptions {
    pub operation_type: String,
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub failed: Option<String>,
    pub transaction: Option<String>,
}

pub fn run(data_dir: Option<&Path>, options: RecordOptions) -> Result<()> {
    let operation_type: OperationType = options.operation_type.parse()?;
    if operation_type.has_destination() && options.destination.is_none() {
        anyhow::bail!("{} needs a destination path", operation_type);
    }
    if !operation_type.has_destination() && options.destination.is_some() {
        anyhow::bail!("{} takes no destination path", operation_type);
    }

    let source = util::absolute_path(&options.source)?;
    let destination = options
        .destination
        .as_deref()
        .map(util::absolute_path)
        .transpose()?;

    let session = Session::writer(data_dir)?;
    let transaction = options
        .transaction
        .as_deref()
        .map(|reference| util::resolve_transaction_ref(&session.journal, reference))
        .transpose()?;

    let mut op = NewOperation::new(operation_type, &source);
    if let Some(dest) = &destination {
        op = op.destination(dest);
    }
    if let Some(txn) = &transaction {
        op = op.transaction(txn.as_str());
    }
    if let Some(message) = &options.failed {
        op = op.failed(message.as_str());
    }
    let id = session.journal.log_operation(op)?;

    if let Some(op) = session.journal.get_operation(id)? {
        util::display_operation(&op);
    }

    session.finish()?;
    Ok(())
}
