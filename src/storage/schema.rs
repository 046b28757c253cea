//! Database schema definitions and the schema-ready check
//!
//! Creating the schema belongs to the operator (`--init-schema` or external
//! migration tooling). The pipeline only verifies it.

use crate::storage::traits::StorageError;
use rusqlite::Connection;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Harvested listings, one row per URL for all time
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT,
    price_usd INTEGER,
    odometer INTEGER,
    username TEXT,
    phone_number TEXT,
    image_url TEXT,
    images_count INTEGER NOT NULL DEFAULT 0,
    car_number TEXT,
    car_vin TEXT,
    datetime_found TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_found ON records(datetime_found);

-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_url TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    state TEXT NOT NULL,
    cancelled INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    fetched INTEGER NOT NULL DEFAULT 0,
    inserted INTEGER NOT NULL DEFAULT 0,
    updated INTEGER NOT NULL DEFAULT 0,
    lost INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Checks that the tables exist and that `records.url` is uniquely indexed
///
/// # Returns
///
/// * `Ok(())` - Schema is ready
/// * `Err(StorageError::SchemaNotReady)` - A table or the unique constraint is missing
pub fn verify_schema(conn: &Connection) -> Result<(), StorageError> {
    for table in ["records", "runs"] {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        if count == 0 {
            return Err(StorageError::SchemaNotReady(format!(
                "table '{}' does not exist",
                table
            )));
        }
    }

    let mut stmt = conn.prepare("PRAGMA index_list('records')")?;
    let unique_indexes = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>("name")?, row.get::<_, i64>("unique")?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (name, unique) in unique_indexes {
        if unique == 0 {
            continue;
        }

        let mut info = conn.prepare(&format!(
            "PRAGMA index_info('{}')",
            name.replace('\'', "''")
        ))?;
        let columns = info
            .query_map([], |row| row.get::<_, String>("name"))?
            .collect::<Result<Vec<_>, _>>()?;

        if columns == ["url"] {
            return Ok(());
        }
    }

    Err(StorageError::SchemaNotReady(
        "records.url has no unique constraint".to_string(),
    ))
}
