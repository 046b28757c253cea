//! Storage traits and error types
//!
//! This module defines the async interface the pipeline consumes from its
//! store, and the associated error types.

use crate::output::RunOutcome;
use crate::storage::{ConflictPolicy, Record, RunRecord, UpsertReport};
use async_trait::async_trait;
use rusqlite::ErrorCode;
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Schema not ready: {0}")]
    SchemaNotReady(String),

    #[error("Storage task failed: {0}")]
    Task(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    /// Returns true if the same operation may succeed when retried
    ///
    /// Busy/locked databases, I/O hiccups and a blocking task that died
    /// are transient; schema problems and constraint errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
            ),
            Self::Task(_) => true,
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Async interface of the uniquely-keyed record store
///
/// Implementations must be shareable across worker tasks. The unique
/// constraint on `url` is enforced by the store itself, so it remains the
/// final duplicate guard even if application-level dedup races.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ===== Schema =====

    /// Fails with [`StorageError::SchemaNotReady`] unless the records table
    /// exists with a unique constraint on `url`
    async fn verify_schema(&self) -> StorageResult<()>;

    // ===== Records =====

    /// Writes a batch in one transaction, keyed on `url`
    ///
    /// Either every row is applied or none is.
    async fn upsert_batch(
        &self,
        records: Vec<Record>,
        policy: ConflictPolicy,
    ) -> StorageResult<UpsertReport>;

    /// Returns the subset of `urls` already stored
    async fn existing_urls(&self, urls: Vec<String>) -> StorageResult<HashSet<String>>;

    /// Gets a record by URL
    async fn get_record(&self, url: &str) -> StorageResult<Option<Record>>;

    /// Counts stored records
    async fn count_records(&self) -> StorageResult<u64>;

    // ===== Run History =====

    /// Creates a run history row and returns its ID
    async fn begin_run(&self, start_url: &str, config_hash: &str) -> StorageResult<i64>;

    /// Stores the final outcome of a run
    async fn finish_run(&self, run_id: i64, outcome: &RunOutcome) -> StorageResult<()>;

    /// Gets the most recent runs, newest first
    async fn recent_runs(&self, limit: u32) -> StorageResult<Vec<RunRecord>>;
}
