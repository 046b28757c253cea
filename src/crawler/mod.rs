//! Crawler module for the concurrent acquisition pipeline
//!
//! This module contains the core harvesting logic, including:
//! - Per-lane request pacing
//! - HTTP fetching with retry and backoff
//! - In-run URL deduplication
//! - The frontier work queue
//! - Batched persistence
//! - Overall run coordination

mod batch;
mod coordinator;
mod dedup;
mod fetcher;
mod frontier;
mod pacer;
mod retry;

pub use batch::{BatchStats, BatchWriter};
pub use coordinator::{run_harvest, Coordinator};
pub use dedup::Deduplicator;
pub use fetcher::{build_http_client, FetchError, FetchedPage, Fetcher};
pub use frontier::{ClaimedEntry, Frontier, FrontierEntry};
pub use pacer::{LaneId, Pacer};
pub use retry::RetryPolicy;
