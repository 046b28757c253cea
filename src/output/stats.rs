//! Statistics from the record store and run outcomes
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics.

use crate::output::RunOutcome;
use crate::storage::{RecordStore, RunRecord};
use crate::HarvestError;

/// Record store statistics summary
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    /// Total number of stored records
    pub total_records: u64,

    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The store to query
/// * `runs` - How many recent runs to include
///
/// # Returns
///
/// * `Ok(StoreStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub async fn load_statistics(
    store: &dyn RecordStore,
    runs: u32,
) -> Result<StoreStatistics, HarvestError> {
    let total_records = store.count_records().await?;
    let recent_runs = store.recent_runs(runs).await?;

    Ok(StoreStatistics {
        total_records,
        recent_runs,
    })
}

/// Prints store statistics to stdout in a formatted manner
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Store Statistics ===\n");

    println!("Overview:");
    println!("  Total records: {}", stats.total_records);
    println!();

    if stats.recent_runs.is_empty() {
        println!("No runs recorded.");
        return;
    }

    println!("Recent Runs:");
    for run in &stats.recent_runs {
        println!(
            "  #{} [{}{}] {} -> {}",
            run.id,
            run.state,
            if run.cancelled { ", cancelled" } else { "" },
            run.started_at,
            run.finished_at.as_deref().unwrap_or("-"),
        );
        println!(
            "      fetched {}, inserted {}, updated {}, skipped {}, lost {}, failed {} ({})",
            run.fetched,
            run.inserted,
            run.updated,
            run.skipped,
            run.lost,
            run.failed,
            run.start_url
        );
    }
}

/// Prints the outcome of a run to stdout
pub fn print_outcome(outcome: &RunOutcome) {
    println!("=== Harvest Outcome ===\n");

    println!(
        "State: {}{}",
        outcome.state,
        if outcome.cancelled { " (cancelled)" } else { "" }
    );
    println!("Duration: {}s", outcome.duration().num_seconds());
    println!();

    println!("Pages:");
    println!("  Fetched: {}", outcome.fetched);
    println!("  Parsed: {}", outcome.parsed);
    println!("  Fetch failures: {}", outcome.fetch_failures);
    println!("  Parse failures: {}", outcome.parse_failures);
    println!();

    println!("Records:");
    println!("  Inserted: {}", outcome.inserted);
    println!("  Updated: {}", outcome.updated);
    println!("  Lost: {}", outcome.lost);
    println!();

    println!(
        "Skipped duplicates: {} ({} in run, {} known before fetch, {} ignored on upsert)",
        outcome.skipped_duplicates(),
        outcome.deduplicated,
        outcome.ignored_existing,
        outcome.conflict_ignored
    );
    println!("Failed: {}", outcome.failed());
}
