//! SQLite storage implementation
//!
//! rusqlite is synchronous; every call runs on tokio's blocking pool against
//! one shared connection, which gives the pipeline the async store it expects.

use crate::output::RunOutcome;
use crate::state::RunState;
use crate::storage::schema::{initialize_schema, verify_schema};
use crate::storage::traits::{RecordStore, StorageError, StorageResult};
use crate::storage::{ConflictPolicy, Record, RunRecord, UpsertReport};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

const INSERT_IGNORE_SQL: &str = "
    INSERT INTO records (url, title, price_usd, odometer, username, phone_number,
                         image_url, images_count, car_number, car_vin, datetime_found)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT(url) DO NOTHING";

// A stale extraction never supersedes a newer one.
const INSERT_UPDATE_SQL: &str = "
    INSERT INTO records (url, title, price_usd, odometer, username, phone_number,
                         image_url, images_count, car_number, car_vin, datetime_found)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT(url) DO UPDATE SET
        title = excluded.title,
        price_usd = excluded.price_usd,
        odometer = excluded.odometer,
        username = excluded.username,
        phone_number = excluded.phone_number,
        image_url = excluded.image_url,
        images_count = excluded.images_count,
        car_number = excluded.car_number,
        car_vin = excluded.car_vin,
        datetime_found = excluded.datetime_found
    WHERE excluded.datetime_found >= records.datetime_found";

const SELECT_RECORD_SQL: &str = "
    SELECT url, title, price_usd, odometer, username, phone_number, image_url,
           images_count, car_number, car_vin, datetime_found
    FROM records WHERE url = ?1";

/// SQLite storage backend
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a database file without touching its schema
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an empty in-memory database without a schema
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory database with the schema applied
    pub fn in_memory_with_schema() -> StorageResult<Self> {
        let store = Self::open_in_memory()?;
        store.init_schema()?;
        Ok(store)
    }

    /// Applies the schema; safe to call on an initialized database
    pub fn init_schema(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        initialize_schema(&conn)?;
        Ok(())
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
    }

    /// Runs `f` against the connection on the blocking pool
    async fn call<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

/// Timestamps are stored at microsecond precision in a fixed-width form so
/// that text comparison orders them chronologically.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let found: String = row.get(10)?;
    Ok(Record {
        url: row.get(0)?,
        title: row.get(1)?,
        price_usd: row.get(2)?,
        odometer: row.get(3)?,
        username: row.get(4)?,
        phone_number: row.get(5)?,
        image_url: row.get(6)?,
        images_count: row.get(7)?,
        car_number: row.get(8)?,
        car_vin: row.get(9)?,
        datetime_found: parse_timestamp(10, &found)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let state: String = row.get(3)?;
    Ok(RunRecord {
        id: row.get(0)?,
        start_url: row.get(1)?,
        config_hash: row.get(2)?,
        state: RunState::from_db_string(&state).unwrap_or(RunState::Failed),
        cancelled: row.get::<_, i64>(4)? != 0,
        started_at: row.get(5)?,
        finished_at: row.get(6)?,
        fetched: row.get::<_, i64>(7)? as u64,
        inserted: row.get::<_, i64>(8)? as u64,
        updated: row.get::<_, i64>(9)? as u64,
        lost: row.get::<_, i64>(10)? as u64,
        skipped: row.get::<_, i64>(11)? as u64,
        failed: row.get::<_, i64>(12)? as u64,
    })
}

fn upsert_in_transaction(
    conn: &mut Connection,
    records: &[Record],
    policy: ConflictPolicy,
) -> StorageResult<UpsertReport> {
    let tx = conn.transaction()?;
    let mut report = UpsertReport::default();

    {
        let mut exists = tx.prepare_cached("SELECT 1 FROM records WHERE url = ?1")?;
        let mut write = tx.prepare_cached(match policy {
            ConflictPolicy::Ignore => INSERT_IGNORE_SQL,
            ConflictPolicy::Update => INSERT_UPDATE_SQL,
        })?;

        for record in records {
            let existed = exists.exists(params![record.url])?;
            let changed = write.execute(params![
                record.url,
                record.title,
                record.price_usd,
                record.odometer,
                record.username,
                record.phone_number,
                record.image_url,
                record.images_count,
                record.car_number,
                record.car_vin,
                format_timestamp(&record.datetime_found),
            ])?;

            match (existed, changed > 0) {
                (false, true) => report.inserted += 1,
                (true, true) => report.updated += 1,
                _ => report.ignored += 1,
            }
        }
    }

    tx.commit()?;
    Ok(report)
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn verify_schema(&self) -> StorageResult<()> {
        self.call(|conn| verify_schema(conn)).await
    }

    async fn upsert_batch(
        &self,
        records: Vec<Record>,
        policy: ConflictPolicy,
    ) -> StorageResult<UpsertReport> {
        if records.is_empty() {
            return Ok(UpsertReport::default());
        }
        self.call(move |conn| upsert_in_transaction(conn, &records, policy))
            .await
    }

    async fn existing_urls(&self, urls: Vec<String>) -> StorageResult<HashSet<String>> {
        if urls.is_empty() {
            return Ok(HashSet::new());
        }
        self.call(move |conn| {
            let mut stmt = conn.prepare_cached("SELECT 1 FROM records WHERE url = ?1")?;
            let mut existing = HashSet::new();
            for url in urls {
                if stmt.exists(params![url])? {
                    existing.insert(url);
                }
            }
            Ok(existing)
        })
        .await
    }

    async fn get_record(&self, url: &str) -> StorageResult<Option<Record>> {
        let url = url.to_string();
        self.call(move |conn| {
            let record = conn
                .query_row(SELECT_RECORD_SQL, params![url], record_from_row)
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn count_records(&self) -> StorageResult<u64> {
        self.call(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    async fn begin_run(&self, start_url: &str, config_hash: &str) -> StorageResult<i64> {
        let start_url = start_url.to_string();
        let config_hash = config_hash.to_string();
        self.call(move |conn| {
            let now = format_timestamp(&Utc::now());
            conn.execute(
                "INSERT INTO runs (start_url, config_hash, state, started_at) VALUES (?1, ?2, ?3, ?4)",
                params![start_url, config_hash, RunState::Running.to_db_string(), now],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn finish_run(&self, run_id: i64, outcome: &RunOutcome) -> StorageResult<()> {
        let outcome = outcome.clone();
        self.call(move |conn| {
            conn.execute(
                "UPDATE runs SET state = ?1, cancelled = ?2, finished_at = ?3, fetched = ?4,
                 inserted = ?5, updated = ?6, lost = ?7, skipped = ?8, failed = ?9 WHERE id = ?10",
                params![
                    outcome.state.to_db_string(),
                    outcome.cancelled,
                    format_timestamp(&outcome.finished_at),
                    outcome.fetched as i64,
                    outcome.inserted as i64,
                    outcome.updated as i64,
                    outcome.lost as i64,
                    outcome.skipped_duplicates() as i64,
                    outcome.failed() as i64,
                    run_id
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent_runs(&self, limit: u32) -> StorageResult<Vec<RunRecord>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, start_url, config_hash, state, cancelled, started_at, finished_at,
                 fetched, inserted, updated, lost, skipped, failed
                 FROM runs ORDER BY id DESC LIMIT ?1",
            )?;
            let runs = stmt
                .query_map(params![limit], run_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
        .await
    }
}
