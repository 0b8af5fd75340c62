//! Check journal consistency

use crate::util::Session;
use anyhow::Result;
use journal::IntegrityReport;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(data_dir: Option<&Path>, repair: bool) -> Result<()> {
    if repair {
        let session = Session::writer(data_dir)?;
        let recovered = session.recovery.as_ref().map_or(0, |r| r.counts_repaired);
        if recovered > 0 {
            println!("Startup recovery already corrected {} transaction count(s)", recovered);
        }
        let result = session.journal.repair(false)?;
        if let Some(initial) = &result.initial_report {
            print_report(initial);
        }
        println!();
        println!(
            "{} Repaired {} transaction count(s) in {:?}",
            "✓".green(),
            result.counts_fixed,
            result.repair_duration
        );
        if let Some(after) = result.final_report.filter(|r| !r.is_healthy()) {
            anyhow::bail!("{} issue(s) remain after repair", after.issue_count());
        }
        return Ok(());
    }

    let Some(session) = Session::reader(data_dir)? else {
        println!("{}", "No journal to verify".dimmed());
        return Ok(());
    };
    let report = session.journal.verify_integrity()?;
    print_report(&report);

    if !report.is_healthy() {
        anyhow::bail!(
            "{} issue(s) found; run `retrace verify --repair`",
            report.issue_count()
        );
    }
    Ok(())
}

fn print_report(report: &IntegrityReport) {
    println!(
        "Checked {} operations and {} transactions in {:?}",
        report.total_operations, report.total_transactions, report.scan_duration
    );

    if report.is_healthy() {
        println!("{} Journal is consistent", "✓".green());
        return;
    }

    for mismatch in &report.count_mismatches {
        println!(
            "  {} transaction {} records {} operations but has {}",
            "count".red(),
            mismatch.transaction_id,
            mismatch.recorded,
            mismatch.actual
        );
    }
    for id in &report.dangling_operations {
        println!("  {} operation {} points at a missing transaction", "dangling".red(), id);
    }
    for id in &report.failed_without_message {
        println!("  {} operation {} failed without an error message", "message".red(), id);
    }
}
