//! Per-lane request pacing
//!
//! Each worker lane waits a random delay between its outbound requests so the
//! pool as a whole never settles into a synchronized cadence. Pacing is
//! independent of retry backoff; a retrying fetch pays both.

use crate::config::PacingConfig;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Identifies a logical worker slot
pub type LaneId = usize;

/// Issues permission for one outbound request per lane
#[derive(Debug)]
pub struct Pacer {
    min_delay: Duration,
    max_delay: Duration,

    /// When each lane was last released
    last_release: Mutex<HashMap<LaneId, Instant>>,
}

impl Pacer {
    /// Creates a pacer drawing delays uniformly from `[min_delay, max_delay]`
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        let (min_delay, max_delay) = if min_delay <= max_delay {
            (min_delay, max_delay)
        } else {
            (max_delay, min_delay)
        };

        Self {
            min_delay,
            max_delay,
            last_release: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &PacingConfig) -> Self {
        Self::new(config.min_delay(), config.max_delay())
    }

    /// Creates a pacer that never waits
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Draws one delay from the configured range
    pub fn draw_delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        if min == max {
            return self.min_delay;
        }
        Duration::from_millis(rand::random_range(min..=max))
    }

    /// Waits until `lane` may issue its next request
    ///
    /// The delay is measured from the lane's previous release, so time a
    /// worker spent parsing or waiting on the network counts toward it. A
    /// lane's first request waits the full drawn delay.
    pub async fn acquire(&self, lane: LaneId) {
        let delay = self.draw_delay();
        let now = Instant::now();

        let release_at = {
            let mut last = match self.last_release.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let release_at = match last.get(&lane) {
                Some(previous) => (*previous + delay).max(now),
                None => now + delay,
            };
            // Reserve the slot before sleeping; a lane is only driven by one
            // worker at a time.
            last.insert(lane, release_at);
            release_at
        };

        if release_at > now {
            tracing::trace!("Lane {} paced for {:?}", lane, release_at - now);
            tokio::time::sleep_until(release_at).await;
        }
    }
}
