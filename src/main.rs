//! Listing Harvester main entry point
//!
//! This is the command-line interface for one harvest run. Scheduling runs
//! (cron, timers) is left to the caller.

use anyhow::Context;
use clap::Parser;
use listing_harvester::config::{load_config_with_hash, validate, Config};
use listing_harvester::output::{load_statistics, print_outcome, print_statistics};
use listing_harvester::storage::{open_store, RecordStore};
use listing_harvester::{run_harvest, RunState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Listing Harvester: a paced, deduplicating scraper for SPA listing sites
///
/// Walks the listing pages starting at the configured URL, extracts every
/// detail page from its embedded application state and stores the records
/// in batches, keyed on their URL.
#[derive(Parser, Debug)]
#[command(name = "listing-harvester")]
#[command(version)]
#[command(about = "A paced, deduplicating scraper for SPA listing sites", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Override the start URL from the configuration
    #[arg(long, value_name = "URL")]
    start_url: Option<String>,

    /// Validate config and check the store without harvesting
    #[arg(long, conflicts_with_all = ["stats", "init_schema"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "init_schema"])]
    stats: bool,

    /// Create the database schema and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    init_schema: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if let Some(start_url) = cli.start_url {
        config.harvest.start_url = start_url;
        validate(&config).context("invalid --start-url")?;
    }

    // Handle different modes
    if cli.init_schema {
        handle_init_schema(&config)
    } else if cli.dry_run {
        handle_dry_run(&config).await
    } else if cli.stats {
        handle_stats(&config).await
    } else {
        handle_harvest(config, config_hash).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG` takes precedence when set.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            // Only show errors
            EnvFilter::new("error")
        } else {
            match verbose {
                0 => EnvFilter::new("listing_harvester=info,warn"),
                1 => EnvFilter::new("listing_harvester=debug,info"),
                2 => EnvFilter::new("listing_harvester=trace,debug"),
                _ => EnvFilter::new("trace"),
            }
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --init-schema mode: creates the tables and unique constraint
fn handle_init_schema(config: &Config) -> anyhow::Result<()> {
    let store = open_store(Path::new(&config.output.database_path))?;
    store.init_schema()?;
    println!("✓ Schema ready in {}", config.output.database_path);
    Ok(())
}

/// Handles the --dry-run mode: validates config and checks the store
async fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Listing Harvester Dry Run ===\n");

    println!("Harvest:");
    println!("  Start URL: {}", config.harvest.start_url);
    println!("  Concurrency: {}", config.harvest.concurrency);
    match config.harvest.max_listing_pages {
        0 => println!("  Max listing pages: unlimited"),
        n => println!("  Max listing pages: {}", n),
    }
    println!("  Skip known URLs: {}", config.harvest.skip_known_urls);

    println!("\nPacing:");
    println!(
        "  Delay per lane: {}ms - {}ms",
        config.pacing.min_delay_ms, config.pacing.max_delay_ms
    );

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}ms doubling up to {}ms (jitter {:.0}%)",
        config.retry.base_delay_ms,
        config.retry.max_delay_ms,
        config.retry.jitter * 100.0
    );

    println!("\nBatch:");
    println!("  Size: {}", config.batch.size);
    println!("  Flush interval: {}ms", config.batch.flush_interval_ms);
    println!("  Conflict policy: {}", config.batch.conflict_policy);
    println!("  Max attempts: {}", config.batch.max_attempts);
    println!(
        "  Fail after {} consecutive lost batches",
        config.batch.max_consecutive_lost
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    let store = open_store(Path::new(&config.output.database_path))?;
    match store.verify_schema().await {
        Ok(()) => println!("\n✓ Schema is ready"),
        Err(e) => println!("\n✗ {} (run with --init-schema)", e),
    }
    println!("✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
async fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_store(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&store, 10).await?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, config_hash: String) -> anyhow::Result<()> {
    let store: Arc<dyn RecordStore> =
        Arc::new(open_store(Path::new(&config.output.database_path))?);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after the current requests");
                cancel.cancel();
            }
        });
    }

    let outcome = run_harvest(config, config_hash, store, cancel).await?;
    print_outcome(&outcome);

    if outcome.state == RunState::Failed {
        anyhow::bail!("harvest run failed");
    }

    Ok(())
}
