//! The work queue of URLs awaiting fetch
//!
//! FIFO order. Workers claim entries through [`Frontier::next`], which hands
//! out a [`ClaimedEntry`] whose drop marks the work complete. The run is over
//! once the queue is empty and nothing is claimed; both are checked under the
//! same lock so a worker about to push new entries keeps the others alive.

use crate::extract::PageKind;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// A URL queued for fetching, with traversal bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Normalized URL to fetch
    pub url: String,

    /// Listing or detail page
    pub kind: PageKind,

    /// Hops from the start URL
    pub depth: u32,

    /// Listing page that discovered this entry
    pub discovered_from: Option<String>,

    /// 1-based number of the listing page this entry is or came from
    pub listing_page: u32,
}

impl FrontierEntry {
    /// Entry for the first listing page of a run
    pub fn seed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: PageKind::Listing,
            depth: 0,
            discovered_from: None,
            listing_page: 1,
        }
    }

    /// Entry for a detail page found on this listing page
    pub fn detail_of(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: PageKind::Detail,
            depth: self.depth + 1,
            discovered_from: Some(self.url.clone()),
            listing_page: self.listing_page,
        }
    }

    /// Entry for the listing page following this one
    pub fn next_listing(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: PageKind::Listing,
            depth: self.depth,
            discovered_from: Some(self.url.clone()),
            listing_page: self.listing_page + 1,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<FrontierEntry>,
    in_flight: usize,
    closed: bool,
}

/// Thread-safe FIFO frontier with in-flight tracking
#[derive(Debug, Default)]
pub struct Frontier {
    inner: Mutex<Inner>,
    changed: Notify,
}

/// An entry claimed by a worker
///
/// Dropping it marks the entry complete. Push any follow-up entries before
/// dropping, or waiting workers may see an exhausted frontier.
#[derive(Debug)]
pub struct ClaimedEntry {
    pub entry: FrontierEntry,
    frontier: Arc<Frontier>,
}

impl Drop for ClaimedEntry {
    fn drop(&mut self) {
        self.frontier.complete();
    }
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Appends entries to the back of the queue
    ///
    /// Entries pushed after [`Frontier::close`] are discarded.
    pub fn push(&self, entries: impl IntoIterator<Item = FrontierEntry>) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        let before = inner.queue.len();
        inner.queue.extend(entries);
        let added = inner.queue.len() - before;
        drop(inner);

        if added > 0 {
            self.changed.notify_waiters();
        }
    }

    /// Takes the next entry without waiting or claiming it
    pub fn pop(&self) -> Option<FrontierEntry> {
        self.lock().queue.pop_front()
    }

    /// Waits for the next entry and claims it
    ///
    /// # Returns
    ///
    /// * `Some(ClaimedEntry)` - An entry to process
    /// * `None` - The queue is empty and no claimed entry remains, or the
    ///   frontier was closed
    pub async fn next(self: &Arc<Self>) -> Option<ClaimedEntry> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);

            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(entry) = inner.queue.pop_front() {
                    inner.in_flight += 1;
                    return Some(ClaimedEntry {
                        entry,
                        frontier: Arc::clone(self),
                    });
                }
                if inner.in_flight == 0 {
                    return None;
                }
                // Register interest before releasing the lock so a push or
                // completion in between is not missed
                notified.as_mut().enable();
            }

            notified.await;
        }
    }

    fn complete(&self) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        let exhausted = inner.in_flight == 0 && inner.queue.is_empty();
        drop(inner);

        if exhausted {
            tracing::debug!("Frontier exhausted");
        }
        self.changed.notify_waiters();
    }

    /// Stops handing out work and wakes every waiting worker
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.queue.clear();
        drop(inner);
        self.changed.notify_waiters();
    }

    /// True if the queue is empty and no entry is claimed
    pub fn is_exhausted(&self) -> bool {
        let inner = self.lock();
        inner.queue.is_empty() && inner.in_flight == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of claimed entries not yet completed
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }
}
