//! In-run URL deduplication
//!
//! The seen-set only covers the current run. Records stored by earlier runs
//! are caught by the store's unique key at upsert time.

use std::collections::HashSet;
use std::sync::Mutex;

/// Set of URLs already dispatched during this run
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<HashSet<String>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    fn seen(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Marks `url` as seen and returns true if it was not seen before
    ///
    /// Check and mark happen under one lock, so concurrent callers racing on
    /// the same URL get exactly one `true`.
    pub fn should_process(&self, url: &str) -> bool {
        let mut seen = self.seen();
        if seen.contains(url) {
            return false;
        }
        seen.insert(url.to_string())
    }

    /// Marks `url` as seen without checking
    pub fn mark_seen(&self, url: &str) {
        self.seen().insert(url.to_string());
    }

    pub fn is_seen(&self, url: &str) -> bool {
        self.seen().contains(url)
    }

    /// Number of distinct URLs seen this run
    pub fn len(&self) -> usize {
        self.seen().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
