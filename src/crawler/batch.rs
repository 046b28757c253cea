//! Batched persistence
//!
//! Records accumulate in a buffer and are written as one bulk upsert when the
//! buffer reaches the configured size or its oldest record reaches the flush
//! interval. A flush swaps the buffer out under the lock, so submits arriving
//! during a flush land in the next generation.

use crate::crawler::retry::RetryPolicy;
use crate::storage::{ConflictPolicy, Record, RecordStore};
use crate::HarvestError;
use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Counters accumulated over the writer's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub submitted: u64,
    pub inserted: u64,
    pub updated: u64,
    pub ignored: u64,
    pub lost: u64,
    pub batches_flushed: u64,
    pub batches_lost: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    ignored: AtomicU64,
    lost: AtomicU64,
    batches_flushed: AtomicU64,
    batches_lost: AtomicU64,
}

#[derive(Debug, Default)]
struct Buffer {
    records: Vec<Record>,
    opened_at: Option<Instant>,
}

impl Buffer {
    fn take(&mut self) -> Vec<Record> {
        self.opened_at = None;
        mem::take(&mut self.records)
    }
}

/// Buffers records and flushes them as bulk upserts
pub struct BatchWriter {
    store: Arc<dyn RecordStore>,
    policy: ConflictPolicy,
    size: usize,
    interval: Duration,
    retry: RetryPolicy,
    max_consecutive_lost: u32,
    buffer: Mutex<Buffer>,
    flush_lock: tokio::sync::Mutex<()>,
    counters: Counters,
    consecutive_lost: AtomicU32,
}

impl BatchWriter {
    /// Creates a writer
    ///
    /// # Arguments
    ///
    /// * `store` - Destination store
    /// * `policy` - What an upsert does with an already stored URL
    /// * `size` - Flush once this many records are buffered
    /// * `interval` - Flush once the oldest buffered record is this old
    /// * `retry` - Backoff for failed batches
    /// * `max_consecutive_lost` - Lost batches in a row that escalate to [`HarvestError::StoreFatal`]
    pub fn new(
        store: Arc<dyn RecordStore>,
        policy: ConflictPolicy,
        size: usize,
        interval: Duration,
        retry: RetryPolicy,
        max_consecutive_lost: u32,
    ) -> Self {
        Self {
            store,
            policy,
            size: size.max(1),
            interval,
            retry,
            max_consecutive_lost: max_consecutive_lost.max(1),
            buffer: Mutex::new(Buffer::default()),
            flush_lock: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
            consecutive_lost: AtomicU32::new(0),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Buffers a record, flushing if the buffer is full
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Buffered (and flushed, if the size was reached)
    /// * `Err(HarvestError::BatchLost)` - The size-triggered flush lost its batch
    /// * `Err(HarvestError::StoreFatal)` - Too many batches lost in a row
    pub async fn submit(&self, record: Record) -> Result<(), HarvestError> {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let full = {
            let mut buffer = self.buffer();
            if buffer.records.is_empty() {
                buffer.opened_at = Some(Instant::now());
            }
            buffer.records.push(record);
            if buffer.records.len() >= self.size {
                Some(buffer.take())
            } else {
                None
            }
        };

        match full {
            Some(batch) => self.write_batch(batch).await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// Flushes whatever is buffered
    ///
    /// # Returns
    ///
    /// * `Ok(inserted)` - Rows newly inserted by this flush
    /// * `Err(HarvestError::BatchLost)` - The batch could not be written
    /// * `Err(HarvestError::StoreFatal)` - Too many batches lost in a row
    pub async fn flush(&self) -> Result<u64, HarvestError> {
        let batch = self.buffer().take();
        self.write_batch(batch).await
    }

    /// Flushes if the oldest buffered record has waited a full interval
    pub async fn flush_if_due(&self) -> Result<u64, HarvestError> {
        let due = {
            let mut buffer = self.buffer();
            match buffer.opened_at {
                Some(opened) if opened.elapsed() >= self.interval => Some(buffer.take()),
                _ => None,
            }
        };

        match due {
            Some(batch) => self.write_batch(batch).await,
            None => Ok(0),
        }
    }

    /// Number of records waiting for a flush
    pub fn buffered(&self) -> usize {
        self.buffer().records.len()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            inserted: self.counters.inserted.load(Ordering::Relaxed),
            updated: self.counters.updated.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            lost: self.counters.lost.load(Ordering::Relaxed),
            batches_flushed: self.counters.batches_flushed.load(Ordering::Relaxed),
            batches_lost: self.counters.batches_lost.load(Ordering::Relaxed),
        }
    }

    async fn write_batch(&self, batch: Vec<Record>) -> Result<u64, HarvestError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let _flushing = self.flush_lock.lock().await;
        let batch = collapse_duplicates(batch);
        let records = batch.len();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.store.upsert_batch(batch.clone(), self.policy).await {
                Ok(report) => {
                    self.consecutive_lost.store(0, Ordering::SeqCst);
                    self.counters.inserted.fetch_add(report.inserted, Ordering::Relaxed);
                    self.counters.updated.fetch_add(report.updated, Ordering::Relaxed);
                    self.counters.ignored.fetch_add(report.ignored, Ordering::Relaxed);
                    self.counters.batches_flushed.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        "Flushed batch of {}: {} inserted, {} updated, {} ignored",
                        records,
                        report.inserted,
                        report.updated,
                        report.ignored
                    );
                    return Ok(report.inserted);
                }
                Err(e) => e,
            };

            if err.is_transient() && self.retry.should_retry(attempt) {
                let delay = self.retry.delay_for(attempt);
                tracing::warn!(
                    "Batch of {} failed (attempt {}/{}): {}; retrying in {:?}",
                    records,
                    attempt,
                    self.retry.max_attempts,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(self.batch_lost(&batch, attempt, err.to_string()));
        }
    }

    fn batch_lost(&self, batch: &[Record], attempts: u32, reason: String) -> HarvestError {
        let records = batch.len();
        self.counters.lost.fetch_add(records as u64, Ordering::Relaxed);
        self.counters.batches_lost.fetch_add(1, Ordering::Relaxed);
        let consecutive = self.consecutive_lost.fetch_add(1, Ordering::SeqCst) + 1;

        for record in batch {
            tracing::warn!("Lost record: {}", record.url);
        }

        if consecutive >= self.max_consecutive_lost {
            tracing::error!(
                "Store lost {} consecutive batches, giving up: {}",
                consecutive,
                reason
            );
            return HarvestError::StoreFatal {
                consecutive,
                reason,
            };
        }

        tracing::warn!(
            "Batch of {} record(s) lost after {} attempt(s): {}",
            records,
            attempts,
            reason
        );
        HarvestError::BatchLost {
            records,
            attempts,
            reason,
        }
    }
}

/// Keeps one record per URL, the last one submitted, at the position of the
/// first occurrence
fn collapse_duplicates(batch: Vec<Record>) -> Vec<Record> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(batch.len());
    let mut collapsed: Vec<Record> = Vec::with_capacity(batch.len());

    for record in batch {
        match positions.get(&record.url) {
            Some(&idx) => collapsed[idx] = record,
            None => {
                positions.insert(record.url.clone(), collapsed.len());
                collapsed.push(record);
            }
        }
    }

    collapsed
}
