//! The outcome a run reports to its caller

use crate::state::RunState;
use chrono::{DateTime, Utc};

/// Counters and final state of one harvest run
///
/// Reported the same way whether the run ended in `Done` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Final state of the run
    pub state: RunState,

    /// True if the run was stopped by a cancellation signal
    pub cancelled: bool,

    /// Pages fetched successfully (listing and detail)
    pub fetched: u64,

    /// URLs dropped after a terminal fetch error
    pub fetch_failures: u64,

    /// Pages that extracted into a listing or a record
    pub parsed: u64,

    /// Pages that did not have the expected structure
    pub parse_failures: u64,

    /// Discovered URLs dropped because this run already had them
    pub deduplicated: u64,

    /// Discovered URLs dropped because the store already had them
    pub ignored_existing: u64,

    /// Records the store already held, left untouched by the upsert
    pub conflict_ignored: u64,

    /// Rows newly inserted
    pub inserted: u64,

    /// Existing rows refreshed under the update policy
    pub updated: u64,

    /// Records in batches the store never accepted
    pub lost: u64,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    /// Empty outcome of a run that has not started yet
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            state: RunState::Idle,
            cancelled: false,
            fetched: 0,
            fetch_failures: 0,
            parsed: 0,
            parse_failures: 0,
            deduplicated: 0,
            ignored_existing: 0,
            conflict_ignored: 0,
            inserted: 0,
            updated: 0,
            lost: 0,
            started_at,
            finished_at: started_at,
        }
    }

    /// URLs or records that did not make it into the store
    pub fn failed(&self) -> u64 {
        self.fetch_failures + self.parse_failures + self.lost
    }

    /// Work skipped because it was already done, in this run or before
    pub fn skipped_duplicates(&self) -> u64 {
        self.deduplicated + self.ignored_existing + self.conflict_ignored
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
