use crate::storage::ConflictPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for a harvest run
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub harvest: HarvestConfig,
    pub pacing: PacingConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub output: OutputConfig,
}

/// What to harvest and how wide the worker pool is
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// First listing page of the run
    #[serde(rename = "start-url")]
    pub start_url: String,

    /// Number of concurrent workers (lanes)
    pub concurrency: u32,

    /// Maximum number of listing pages to follow; 0 means no limit
    #[serde(rename = "max-listing-pages", default)]
    pub max_listing_pages: u32,

    /// Drop detail URLs that the store already holds before fetching them
    #[serde(rename = "skip-known-urls", default)]
    pub skip_known_urls: bool,
}

/// Randomized per-lane delay between outbound requests
///
/// This is a soft anti-blocking heuristic and is independent of retry backoff.
#[derive(Debug, Clone, Deserialize)]
pub struct PacingConfig {
    /// Lower bound of the per-request delay (milliseconds)
    #[serde(rename = "min-delay-ms")]
    pub min_delay_ms: u64,

    /// Upper bound of the per-request delay (milliseconds)
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,
}

impl PacingConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Fetch retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per URL, first try included
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single retry delay (milliseconds)
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Relative jitter applied to each delay (0.0 - 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

/// Batch persistence settings
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Flush once this many records are buffered
    pub size: usize,

    /// Flush at least this often while records are buffered (milliseconds)
    #[serde(rename = "flush-interval-ms")]
    pub flush_interval_ms: u64,

    /// Attempts per batch before it is reported lost
    #[serde(rename = "max-attempts", default = "default_batch_attempts")]
    pub max_attempts: u32,

    /// What an upsert does with a URL that is already stored
    #[serde(rename = "conflict-policy", default)]
    pub conflict_policy: ConflictPolicy,

    /// Consecutive lost batches that fail the whole run
    #[serde(rename = "max-consecutive-lost", default = "default_max_consecutive_lost")]
    pub max_consecutive_lost: u32,
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// HTTP client settings
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection establishment timeout (seconds)
    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Accept-Language header sent with every request
    #[serde(rename = "accept-language", default = "default_accept_language")]
    pub accept_language: String,

    /// User agents to rotate between; one is picked per fetcher
    #[serde(rename = "user-agents", default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            accept_language: default_accept_language(),
            user_agents: default_user_agents(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

fn default_jitter() -> f64 {
    0.2
}

fn default_batch_attempts() -> u32 {
    3
}

fn default_max_consecutive_lost() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    25
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_accept_language() -> String {
    "uk-UA,uk;q=0.9,en-US;q=0.8,en;q=0.7".to_string()
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
    ]
    .iter()
    .map(|ua| ua.to_string())
    .collect()
}
