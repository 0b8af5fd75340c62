//! retrace CLI - undo and redo for journaled file operations

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use retrace::cmd::{self, Target};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// retrace - transactional undo/redo for file organization
#[derive(Parser)]
#[command(name = "retrace")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Journal data directory
    #[arg(long, global = true, env = "RETRACE_DIR")]
    data_dir: Option<PathBuf>,

    /// More log output (-v info, -vv debug); RUST_LOG also works
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show journaled operations, newest first
    History {
        /// Number of operations to show
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Only this operation type (move, rename, delete, copy, create)
        #[arg(long = "type")]
        operation_type: Option<String>,
        /// Only this status (completed, failed, rolled_back)
        #[arg(long)]
        status: Option<String>,
        /// Only members of this transaction
        #[arg(long)]
        transaction: Option<String>,
    },
    /// Show a transaction and its operations
    Show {
        /// Transaction id or unique prefix
        transaction: String,
    },
    /// Undo the last operation, or a given operation or transaction
    Undo {
        #[arg(long, conflicts_with = "transaction")]
        operation: Option<i64>,
        #[arg(long)]
        transaction: Option<String>,
        /// Only show what would be undone
        #[arg(long)]
        dry_run: bool,
    },
    /// Redo the last undone operation, or a given operation or transaction
    Redo {
        #[arg(long, conflicts_with = "transaction")]
        operation: Option<i64>,
        #[arg(long)]
        transaction: Option<String>,
        /// Only show what would be redone
        #[arg(long)]
        dry_run: bool,
    },
    /// Journal an operation performed by another tool
    Record {
        /// move, rename, delete, copy or create
        operation_type: String,
        source: PathBuf,
        destination: Option<PathBuf>,
        /// Record the operation as failed with this message
        #[arg(long)]
        failed: Option<String>,
        /// Add to an open transaction
        #[arg(long)]
        transaction: Option<String>,
    },
    /// Delete a file or directory into quarantine, journaled so it can be undone
    Delete {
        path: PathBuf,
        /// Add to an open transaction
        #[arg(long)]
        transaction: Option<String>,
    },
    /// Show journal statistics
    Stats,
    /// Apply retention limits
    Cleanup {
        /// Only clean up if a limit is exceeded
        #[arg(long)]
        auto: bool,
        /// Keep at most this many operations
        #[arg(long)]
        max_operations: Option<u64>,
        /// Delete operations older than this many days
        #[arg(long)]
        max_age_days: Option<u32>,
        /// Delete failed operations older than this many days
        #[arg(long, value_name = "DAYS")]
        failed: Option<u32>,
        /// Delete rolled-back operations older than this many days
        #[arg(long, value_name = "DAYS")]
        rolled_back: Option<u32>,
        /// Delete transactions with no remaining operations
        #[arg(long)]
        orphans: bool,
        /// Remove quarantine entries no operation refers to
        #[arg(long)]
        quarantine: bool,
    },
    /// Delete all history and quarantined files
    Clear {
        /// Confirm
        #[arg(long)]
        yes: bool,
    },
    /// Check journal consistency
    Verify {
        /// Fix transaction operation counts
        #[arg(long)]
        repair: bool,
    },
    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let data_dir = cli.data_dir.as_deref();

    match cli.command {
        Commands::History { limit, operation_type, status, transaction } => cmd::history::run(
            data_dir,
            cmd::history::HistoryOptions { limit, operation_type, status, transaction },
        ),
        Commands::Show { transaction } => cmd::show::run(data_dir, &transaction),
        Commands::Undo { operation, transaction, dry_run } => {
            cmd::undo::run(data_dir, Target::from_args(operation, transaction), dry_run)
        }
        Commands::Redo { operation, transaction, dry_run } => {
            cmd::redo::run(data_dir, Target::from_args(operation, transaction), dry_run)
        }
        Commands::Record { operation_type, source, destination, failed, transaction } => {
            cmd::record::run(
                data_dir,
                cmd::record::RecordOptions {
                    operation_type,
                    source,
                    destination,
                    failed,
                    transaction,
                },
            )
        }
        Commands::Delete { path, transaction } => {
            cmd::delete::run(data_dir, &path, transaction.as_deref())
        }
        Commands::Stats => cmd::stats::run(data_dir),
        Commands::Cleanup {
            auto,
            max_operations,
            max_age_days,
            failed,
            rolled_back,
            orphans,
            quarantine,
        } => cmd::cleanup::run(
            data_dir,
            cmd::cleanup::CleanupOptions {
                auto,
                max_operations,
                max_age_days,
                failed_days: failed,
                rolled_back_days: rolled_back,
                orphans,
                quarantine,
            },
        ),
        Commands::Clear { yes } => cmd::clear::run(data_dir, yes),
        Commands::Verify { repair } => cmd::verify::run(data_dir, repair),
        Commands::Config { init } => cmd::config::run(data_dir, init),
    }
}
