//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the harvester, including:
//! - Building HTTP clients with a realistic browser header set
//! - Pacing every attempt through the [`Pacer`]
//! - Retry with exponential backoff for transient failures
//! - Response classification
//! - Prompt abort on cancellation

use crate::config::HttpConfig;
use crate::crawler::pacer::{LaneId, Pacer};
use crate::crawler::retry::RetryPolicy;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, UPGRADE_INSECURE_REQUESTS};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// A fetch that did not produce a page
#[derive(Debug, Error)]
pub enum FetchError {
    /// Retries exhausted or a non-retryable response
    #[error("{url}: {reason} (after {attempts} attempt(s))")]
    Terminal {
        url: String,
        status: Option<u16>,
        reason: String,
        attempts: u32,
    },

    /// The run was cancelled while this fetch was pending
    #[error("{url}: fetch cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    /// Last HTTP status seen, if any response arrived
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Terminal { status, .. } => *status,
            Self::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL that was requested
    pub url: String,

    /// URL after redirects
    pub final_url: String,

    /// HTTP status code
    pub status: u16,

    /// Page body
    pub body: String,

    /// Attempts used, first try included
    pub attempts: u32,
}

/// How a single attempt ended
#[derive(Debug)]
enum Attempt {
    Success(FetchedPage),
    Retryable { status: Option<u16>, reason: String },
    Malformed { status: u16, reason: String },
    Terminal { status: Option<u16>, reason: String },
}

/// Builds an HTTP client with a browser-like header set
///
/// One user agent is picked at random from the configured rotation list per
/// client, so every request of a run presents the same browser.
///
/// # Arguments
///
/// * `config` - The HTTP configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    if let Ok(value) = HeaderValue::from_str(&config.accept_language) {
        headers.insert(ACCEPT_LANGUAGE, value);
    }

    let mut builder = Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true);

    if let Some(user_agent) = pick_user_agent(&config.user_agents) {
        builder = builder.user_agent(user_agent);
    }

    builder.build()
}

fn pick_user_agent(user_agents: &[String]) -> Option<&str> {
    if user_agents.is_empty() {
        return None;
    }
    let idx = rand::random_range(0..user_agents.len());
    user_agents.get(idx).map(String::as_str)
}

/// Classifies a response status
///
/// | Status | Outcome |
/// |--------|---------|
/// | 2xx | success |
/// | 429, 5xx | retryable |
/// | other | terminal |
fn classify_status(status: StatusCode) -> Option<bool> {
    if status.is_success() {
        None
    } else {
        Some(status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
    }
}

/// Classifies a transport error; returns true if retryable
fn is_retryable_transport(error: &reqwest::Error) -> bool {
    if error.is_builder() || error.is_redirect() {
        return false;
    }
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
        || error.is_decode()
}

/// Paced, retrying page fetcher shared by all workers
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    pacer: Arc<Pacer>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(
        client: Client,
        pacer: Arc<Pacer>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            pacer,
            retry,
            cancel,
        }
    }

    /// Fetches `url` on behalf of worker lane `lane`
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | HTTP 2xx with a body | Success |
    /// | HTTP 429 / 5xx | Retry with backoff |
    /// | Timeout / connection error | Retry with backoff |
    /// | Unreadable or empty body | Retry once, then terminal |
    /// | Other HTTP status | Terminal immediately |
    ///
    /// Every attempt waits on the pacer first. Cancellation interrupts the
    /// pacing wait, the request and the backoff sleep.
    ///
    /// # Returns
    ///
    /// * `Ok(FetchedPage)` - The page body and metadata
    /// * `Err(FetchError::Terminal)` - Carries the last status and reason
    /// * `Err(FetchError::Cancelled)` - The run was cancelled
    pub async fn fetch(&self, url: &str, lane: LaneId) -> Result<FetchedPage, FetchError> {
        let mut attempt: u32 = 0;
        let mut malformed_retried = false;

        loop {
            attempt += 1;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(url)),
                _ = self.pacer.acquire(lane) => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(url)),
                outcome = self.attempt(url, attempt) => outcome,
            };

            let (status, reason) = match outcome {
                Attempt::Success(page) => {
                    tracing::debug!("Fetched {} ({}) in {} attempt(s)", url, page.status, attempt);
                    return Ok(page);
                }
                Attempt::Terminal { status, reason } => {
                    return Err(FetchError::Terminal {
                        url: url.to_string(),
                        status,
                        reason,
                        attempts: attempt,
                    });
                }
                Attempt::Malformed { status, reason } => {
                    if malformed_retried {
                        return Err(FetchError::Terminal {
                            url: url.to_string(),
                            status: Some(status),
                            reason,
                            attempts: attempt,
                        });
                    }
                    malformed_retried = true;
                    (Some(status), reason)
                }
                Attempt::Retryable { status, reason } => (status, reason),
            };

            if !self.retry.should_retry(attempt) {
                return Err(FetchError::Terminal {
                    url: url.to_string(),
                    status,
                    reason,
                    attempts: attempt,
                });
            }

            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                "Retryable failure for {} (attempt {}/{}): {}; backing off {:?}",
                url,
                attempt,
                self.retry.max_attempts,
                reason,
                delay
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(url)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self, url: &str, attempt: u32) -> Attempt {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                let reason = if e.is_timeout() {
                    "request timeout".to_string()
                } else if e.is_connect() {
                    format!("connection failed: {}", e)
                } else {
                    e.to_string()
                };
                return if is_retryable_transport(&e) {
                    Attempt::Retryable {
                        status: None,
                        reason,
                    }
                } else {
                    Attempt::Terminal {
                        status: None,
                        reason,
                    }
                };
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();

        match classify_status(status) {
            Some(true) => {
                return Attempt::Retryable {
                    status: Some(status.as_u16()),
                    reason: format!("HTTP {}", status),
                }
            }
            Some(false) => {
                return Attempt::Terminal {
                    status: Some(status.as_u16()),
                    reason: format!("HTTP {}", status),
                }
            }
            None => {}
        }

        match response.text().await {
            Ok(body) if body.trim().is_empty() => Attempt::Malformed {
                status: status.as_u16(),
                reason: "empty response body".to_string(),
            },
            Ok(body) => Attempt::Success(FetchedPage {
                url: url.to_string(),
                final_url,
                status: status.as_u16(),
                body,
                attempts: attempt,
            }),
            Err(e) => Attempt::Malformed {
                status: status.as_u16(),
                reason: format!("unreadable body: {}", e),
            },
        }
    }

    fn cancelled(&self, url: &str) -> FetchError {
        FetchError::Cancelled {
            url: url.to_string(),
        }
    }
}
