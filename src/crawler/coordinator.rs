//! Harvest coordinator - main run orchestration logic
//!
//! This module contains the worker pool that coordinates a harvest run:
//! - Verifying the store schema before any work starts
//! - Seeding the frontier with the start URL
//! - Driving fetch → extract → dedup → write in N concurrent workers
//! - Following listing pagination
//! - Interval-triggered batch flushing
//! - Draining, the final flush and the run history row

use crate::config::Config;
use crate::crawler::batch::BatchWriter;
use crate::crawler::dedup::Deduplicator;
use crate::crawler::fetcher::{build_http_client, FetchError, Fetcher};
use crate::crawler::frontier::{Frontier, FrontierEntry};
use crate::crawler::pacer::{LaneId, Pacer};
use crate::crawler::retry::RetryPolicy;
use crate::extract::{extract, ExtractResult, PageKind};
use crate::output::RunOutcome;
use crate::state::RunState;
use crate::storage::{RecordStore, StorageError};
use crate::url::normalize_url;
use crate::HarvestError;
use chrono::{DateTime, SubsecRound, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Log progress every this many fetched pages
const PROGRESS_EVERY: u64 = 25;

/// Per-run counters shared by all workers
#[derive(Debug, Default)]
struct RunCounters {
    fetched: AtomicU64,
    fetch_failures: AtomicU64,
    parsed: AtomicU64,
    parse_failures: AtomicU64,
    deduplicated: AtomicU64,
    ignored_existing: AtomicU64,
}

/// Hands out `datetime_found` stamps that never go backwards within a run
///
/// Stamps are truncated to microseconds, the precision the store keeps.
#[derive(Debug)]
struct FoundClock {
    last: Mutex<DateTime<Utc>>,
}

impl FoundClock {
    fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if now > *last {
            *last = now;
        }
        *last
    }
}

/// State shared by the workers of one run
struct Worker {
    config: Arc<Config>,
    store: Arc<dyn RecordStore>,
    fetcher: Fetcher,
    frontier: Arc<Frontier>,
    dedup: Deduplicator,
    writer: BatchWriter,
    counters: RunCounters,
    clock: FoundClock,

    /// Stops the workers; cancelled by the caller's token or by a fatal error
    halt: CancellationToken,

    /// First fatal error raised during the run
    fatal: Mutex<Option<HarvestError>>,
}

impl Worker {
    /// Records a fatal error and stops accepting new work
    fn escalate(&self, error: HarvestError) {
        tracing::error!("Fatal: {}", error);
        {
            let mut fatal = match self.fatal.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if fatal.is_none() {
                *fatal = Some(error);
            }
        }
        self.halt.cancel();
        self.frontier.close();
    }

    fn take_fatal(&self) -> Option<HarvestError> {
        match self.fatal.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn write_failed(&self, error: HarvestError) {
        match error {
            HarvestError::StoreFatal { .. } => self.escalate(error),
            // Lost batches are logged by the writer and the run continues
            HarvestError::BatchLost { .. } => {}
            other => tracing::warn!("Batch write failed: {}", other),
        }
    }

    /// Pulls entries until the frontier is exhausted or the run halts
    async fn run(self: Arc<Self>, lane: LaneId) {
        tracing::debug!("Worker {} started", lane);

        loop {
            let claimed = tokio::select! {
                biased;
                _ = self.halt.cancelled() => break,
                next = self.frontier.next() => match next {
                    Some(claimed) => claimed,
                    None => break,
                },
            };

            self.process(&claimed.entry, lane).await;
            // Follow-up entries are pushed before the claim is released
            drop(claimed);
        }

        tracing::debug!("Worker {} finished", lane);
    }

    async fn process(&self, entry: &FrontierEntry, lane: LaneId) {
        let page = match self.fetcher.fetch(&entry.url, lane).await {
            Ok(page) => page,
            Err(FetchError::Cancelled { .. }) => return,
            Err(e) => {
                self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dropping {} page: {}", entry.kind.as_str(), e);
                return;
            }
        };

        let fetched = self.counters.fetched.fetch_add(1, Ordering::Relaxed) + 1;
        if fetched % PROGRESS_EVERY == 0 {
            tracing::info!(
                "Progress: {} pages fetched, {} queued, {} in flight",
                fetched,
                self.frontier.len(),
                self.frontier.in_flight()
            );
        }

        // Links on a listing resolve against the URL after redirects; records
        // stay keyed on the URL they were queued under
        let base = match entry.kind {
            PageKind::Listing => &page.final_url,
            PageKind::Detail => &entry.url,
        };
        let page_url = match Url::parse(base) {
            Ok(url) => url,
            Err(e) => {
                self.counters.parse_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Unusable page URL {}: {}", base, e);
                return;
            }
        };

        match extract(&page_url, &page.body, entry.kind, self.clock.now()) {
            ExtractResult::Listing { urls, next_page } => {
                self.counters.parsed.fetch_add(1, Ordering::Relaxed);
                self.enqueue_listing(entry, urls, next_page).await;
            }
            ExtractResult::Detail { record } => {
                self.counters.parsed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Parsed {} ({})",
                    record.url,
                    record.title.as_deref().unwrap_or("untitled")
                );
                if let Err(e) = self.writer.submit(record).await {
                    self.write_failed(e);
                }
            }
            ExtractResult::Unparseable { reason } => {
                self.counters.parse_failures.fetch_add(1, Ordering::Relaxed);
                let error = HarvestError::Parse {
                    url: entry.url.clone(),
                    reason,
                };
                tracing::warn!("Dropping {} page: {}", entry.kind.as_str(), error);
            }
        }
    }

    /// Queues the new detail URLs of a listing page and its successor page
    async fn enqueue_listing(
        &self,
        entry: &FrontierEntry,
        urls: Vec<String>,
        next_page: Option<String>,
    ) {
        let discovered = urls.len();
        let mut fresh = Vec::with_capacity(discovered);

        for raw in urls {
            let normalized = match normalize_url(&raw) {
                Ok(url) => url.to_string(),
                Err(e) => {
                    tracing::debug!("Skipping {}: {}", raw, e);
                    continue;
                }
            };
            if self.dedup.should_process(&normalized) {
                fresh.push(normalized);
            } else {
                self.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
            }
        }

        let new_in_run = fresh.len();

        if self.config.harvest.skip_known_urls && !fresh.is_empty() {
            match self.store.existing_urls(fresh.clone()).await {
                Ok(existing) => {
                    self.counters
                        .ignored_existing
                        .fetch_add(existing.len() as u64, Ordering::Relaxed);
                    fresh.retain(|url| !existing.contains(url));
                }
                Err(e) => tracing::warn!(
                    "Known-URL lookup failed for {}, fetching all: {}",
                    entry.url,
                    e
                ),
            }
        }

        tracing::info!(
            "Listing page {} | {} link(s), {} new | {}",
            entry.listing_page,
            discovered,
            fresh.len(),
            entry.url
        );

        let mut entries: Vec<FrontierEntry> =
            fresh.into_iter().map(|url| entry.detail_of(url)).collect();

        if discovered == 0 {
            tracing::info!("No links on listing page {}, not paginating", entry.listing_page);
        } else if new_in_run == 0 {
            tracing::info!(
                "Listing page {} repeats earlier links, not paginating",
                entry.listing_page
            );
        } else if let Some(next) = next_page {
            let max_pages = self.config.harvest.max_listing_pages;
            if max_pages != 0 && entry.listing_page >= max_pages {
                tracing::info!("Reached max-listing-pages ({})", max_pages);
            } else if let Ok(next) = normalize_url(&next) {
                let next = next.to_string();
                if self.dedup.should_process(&next) {
                    entries.push(entry.next_listing(next));
                }
            }
        }

        self.frontier.push(entries);
    }
}

/// Main harvest coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    store: Arc<dyn RecordStore>,
    cancel: CancellationToken,
    state: Mutex<RunState>,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The validated harvest configuration
    /// * `config_hash` - Hash of the configuration, stored with the run
    /// * `store` - The record store
    /// * `cancel` - Cancelling this token stops the run after a final flush
    pub fn new(
        config: Config,
        config_hash: impl Into<String>,
        store: Arc<dyn RecordStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            config_hash: config_hash.into(),
            store,
            cancel,
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> RunState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn transition(&self, next: RunState) -> Result<(), HarvestError> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !state.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        tracing::info!("Run state: {} -> {}", *state, next);
        *state = next;
        Ok(())
    }

    /// Runs one complete harvest
    ///
    /// This is the core logic that:
    /// 1. Verifies the store schema (fails fast if it is not ready)
    /// 2. Seeds the frontier with the start URL
    /// 3. Runs N workers until the frontier is exhausted, the run is
    ///    cancelled, or the store fails for good
    /// 4. Flushes the remaining buffered records
    /// 5. Records the run outcome in the run history
    ///
    /// # Returns
    ///
    /// * `Ok(RunOutcome)` - The run ended in `Done` or `Failed`; see its state
    /// * `Err(HarvestError)` - The run could not start
    pub async fn run(&self) -> Result<RunOutcome, HarvestError> {
        let started_at = Utc::now();

        self.store.verify_schema().await.map_err(|e| match e {
            StorageError::SchemaNotReady(reason) => HarvestError::SchemaNotReady(reason),
            other => HarvestError::Storage(other),
        })?;

        let start_url = normalize_url(&self.config.harvest.start_url)?.to_string();
        let client = build_http_client(&self.config.http)?;
        let halt = self.cancel.child_token();

        let worker = Arc::new(Worker {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            fetcher: Fetcher::new(
                client,
                Arc::new(Pacer::from_config(&self.config.pacing)),
                RetryPolicy::from_config(&self.config.retry),
                halt.clone(),
            ),
            frontier: Arc::new(Frontier::new()),
            dedup: Deduplicator::new(),
            writer: BatchWriter::new(
                Arc::clone(&self.store),
                self.config.batch.conflict_policy,
                self.config.batch.size,
                self.config.batch.flush_interval(),
                RetryPolicy::for_batches(&self.config.batch, &self.config.retry),
                self.config.batch.max_consecutive_lost,
            ),
            counters: RunCounters::default(),
            clock: FoundClock::new(),
            halt: halt.clone(),
            fatal: Mutex::new(None),
        });

        let run_id = self.store.begin_run(&start_url, &self.config_hash).await?;
        self.transition(RunState::Running)?;
        tracing::info!(
            "Starting run {} | start_url={} | concurrency={} | policy={}",
            run_id,
            start_url,
            self.config.harvest.concurrency,
            self.config.batch.conflict_policy
        );

        worker.dedup.mark_seen(&start_url);
        worker.frontier.push([FrontierEntry::seed(start_url.clone())]);

        let workers_done = CancellationToken::new();
        let flusher = tokio::spawn(interval_flusher(Arc::clone(&worker), workers_done.clone()));

        let mut workers = JoinSet::new();
        for lane in 0..self.config.harvest.concurrency as LaneId {
            workers.spawn(Arc::clone(&worker).run(lane));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        workers_done.cancel();
        if let Err(e) = flusher.await {
            tracing::error!("Flusher task failed: {}", e);
        }

        let cancelled = self.cancel.is_cancelled();
        let mut fatal = worker.take_fatal();

        if fatal.is_some() {
            self.transition(RunState::Failed)?;
        } else {
            if cancelled {
                tracing::warn!("Run cancelled, flushing buffered records");
            }
            self.transition(RunState::Draining)?;
        }

        // Best effort, also after a fatal error
        match worker.writer.flush().await {
            Ok(_) => {}
            Err(e @ HarvestError::StoreFatal { .. }) if fatal.is_none() => {
                tracing::error!("Fatal: {}", e);
                self.transition(RunState::Failed)?;
                fatal = Some(e);
            }
            Err(e) => tracing::warn!("Final flush failed: {}", e),
        }

        if fatal.is_none() {
            self.transition(RunState::Done)?;
        }

        let outcome = self.outcome(&worker, started_at, cancelled);
        if let Err(e) = self.store.finish_run(run_id, &outcome).await {
            tracing::warn!("Failed to record outcome of run {}: {}", run_id, e);
        }

        tracing::info!(
            "Run {} {}: fetched {}, parsed {}, deduplicated {}, inserted {}, updated {}, lost {}, failed {}",
            run_id,
            outcome.state,
            outcome.fetched,
            outcome.parsed,
            outcome.skipped_duplicates(),
            outcome.inserted,
            outcome.updated,
            outcome.lost,
            outcome.failed()
        );

        Ok(outcome)
    }

    fn outcome(&self, worker: &Worker, started_at: DateTime<Utc>, cancelled: bool) -> RunOutcome {
        let counters = &worker.counters;
        let batches = worker.writer.stats();

        RunOutcome {
            state: self.state(),
            cancelled,
            fetched: counters.fetched.load(Ordering::Relaxed),
            fetch_failures: counters.fetch_failures.load(Ordering::Relaxed),
            parsed: counters.parsed.load(Ordering::Relaxed),
            parse_failures: counters.parse_failures.load(Ordering::Relaxed),
            deduplicated: counters.deduplicated.load(Ordering::Relaxed),
            ignored_existing: counters.ignored_existing.load(Ordering::Relaxed),
            conflict_ignored: batches.ignored,
            inserted: batches.inserted,
            updated: batches.updated,
            lost: batches.lost,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Flushes the batch writer whenever its oldest record has waited a full interval
async fn interval_flusher(worker: Arc<Worker>, workers_done: CancellationToken) {
    let period = (worker.writer.interval() / 4).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = workers_done.cancelled() => break,
            _ = worker.halt.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = worker.writer.flush_if_due().await {
                    worker.write_failed(e);
                }
            }
        }
    }
}

/// Runs a complete harvest
///
/// This is the main entry point for starting a run. It will:
/// 1. Verify the store schema
/// 2. Fetch the start listing page and every listing page it paginates to
/// 3. Fetch, extract and persist every new detail page
/// 4. Return the run outcome
///
/// # Arguments
///
/// * `config` - The harvest configuration
/// * `config_hash` - Hash of the configuration, stored with the run
/// * `store` - The record store
/// * `cancel` - Cancellation signal for the run
pub async fn run_harvest(
    config: Config,
    config_hash: impl Into<String>,
    store: Arc<dyn RecordStore>,
    cancel: CancellationToken,
) -> Result<RunOutcome, HarvestError> {
    Coordinator::new(config, config_hash, store, cancel).run().await
}
