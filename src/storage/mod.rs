//! Storage module for persisting harvested records
//!
//! This module handles all database operations for the harvester, including:
//! - Schema bootstrap and the "schema ready" check the pipeline runs before starting
//! - Bulk upserts keyed on the record URL
//! - Run history

mod schema;
mod sqlite;
mod traits;

pub use schema::{initialize_schema, verify_schema};
pub use sqlite::SqliteStore;
pub use traits::{RecordStore, StorageError, StorageResult};

use crate::state::RunState;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// Opens the record store at the given path
///
/// The schema is not created here; see [`SqliteStore::init_schema`].
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    SqliteStore::open(path)
}

/// A harvested listing, keyed on its URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub url: String,
    pub title: Option<String>,
    pub price_usd: Option<u32>,
    pub odometer: Option<u32>,
    pub username: Option<String>,
    pub phone_number: Option<String>,
    pub image_url: Option<String>,
    pub images_count: u32,
    pub car_number: Option<String>,
    pub car_vin: Option<String>,
    pub datetime_found: DateTime<Utc>,
}

impl Record {
    /// Creates a record with only its key and discovery time set
    pub fn new(url: impl Into<String>, datetime_found: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            title: None,
            price_usd: None,
            odometer: None,
            username: None,
            phone_number: None,
            image_url: None,
            images_count: 0,
            car_number: None,
            car_vin: None,
            datetime_found,
        }
    }
}

/// What a bulk upsert does when a URL is already stored
///
/// `Ignore` treats a stored record as final: re-scraped data for an existing
/// listing is not considered more authoritative. `Update` refreshes the row
/// with the newer extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Ignore,
    Update,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-row result of one bulk upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Rows for URLs the store did not hold before
    pub inserted: u64,

    /// Existing rows refreshed under [`ConflictPolicy::Update`]
    pub updated: u64,

    /// Rows left untouched because the URL was already stored
    pub ignored: u64,
}

/// Represents a harvest run in the history table
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub start_url: String,
    pub config_hash: String,
    pub state: RunState,
    pub cancelled: bool,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub fetched: u64,
    pub inserted: u64,
    pub updated: u64,
    pub lost: u64,
    pub skipped: u64,
    pub failed: u64,
}
