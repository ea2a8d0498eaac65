//! Database schema for the archive and its daily summary tables.
//!
//! Observation columns are created without a declared SQLite type, so the
//! column affinity never rewrites a stored value: the runtime type of what
//! a writer inserted is exactly what a later scan reads back. The declared
//! schema, the engine's notion of what each column should hold, is
//! persisted as JSON in the `metadata` table instead.

use rusqlite::Connection;
use tracing::debug;

use terralog_types::{ArchiveSchema, TIMESTAMP_COLUMN};

use crate::error::{Error, Result};

/// Daily summary schema version with interval weighting applied.
pub const DAILY_SUMMARY_VERSION: &str = "2.0";

/// Metadata key holding the archive schema as JSON.
pub(crate) const META_ARCHIVE_SCHEMA: &str = "archive_schema";
/// Metadata key holding the store's unit system tag.
pub(crate) const META_UNIT_SYSTEM: &str = "unit_system";
/// Metadata key holding the daily summary schema version.
pub(crate) const META_DAILY_VERSION: &str = "daily_summary_version";
/// Metadata key recording the newest archive timestamp folded into the summary.
pub(crate) const META_DAILY_LAST_UPDATE: &str = "daily_last_update";

/// Whether a table exists in this database.
pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?",
        [name],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Whether the archive table exists.
pub(crate) fn archive_exists(conn: &Connection) -> Result<bool> {
    table_exists(conn, "archive")
}

/// Whether the daily summary table exists.
pub(crate) fn daily_exists(conn: &Connection) -> Result<bool> {
    table_exists(conn, "daily_summary")
}

/// Create the archive and metadata tables and persist the declared schema.
pub(crate) fn create_archive(conn: &Connection, schema: &ArchiveSchema) -> Result<()> {
    let mut columns = vec![format!(
        "\"{}\" INTEGER NOT NULL PRIMARY KEY",
        TIMESTAMP_COLUMN
    )];
    // Typeless on purpose: BLOB affinity stores values as given.
    columns.extend(
        schema
            .observations()
            .map(|c| format!("\"{}\"", c.name)),
    );

    conn.execute_batch(&format!(
        "CREATE TABLE archive ({});
         CREATE TABLE IF NOT EXISTS metadata (
             key TEXT NOT NULL PRIMARY KEY,
             value TEXT NOT NULL
         );",
        columns.join(", ")
    ))?;

    set_meta(conn, META_ARCHIVE_SCHEMA, &serde_json::to_string(schema)?)?;
    debug!(columns = schema.columns().len(), "created archive schema");
    Ok(())
}

/// Create the daily summary table if absent, at the current version.
///
/// A store that already carries a version marker keeps it; only a fresh
/// summary store is stamped with [`DAILY_SUMMARY_VERSION`].
pub(crate) fn ensure_daily(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS daily_summary (
             obs TEXT NOT NULL,
             day_start INTEGER NOT NULL,
             count INTEGER NOT NULL DEFAULT 0,
             sum REAL NOT NULL DEFAULT 0,
             min REAL,
             min_time INTEGER,
             max REAL,
             max_time INTEGER,
             wsum REAL NOT NULL DEFAULT 0,
             wtime INTEGER NOT NULL DEFAULT 0,
             PRIMARY KEY (obs, day_start)
         );
         CREATE INDEX IF NOT EXISTS idx_daily_summary_day
             ON daily_summary(day_start);",
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO metadata (key, value) VALUES (?1, ?2)",
        rusqlite::params![META_DAILY_VERSION, DAILY_SUMMARY_VERSION],
    )?;
    Ok(())
}

/// Drop the daily summary table and its metadata markers.
pub(crate) fn drop_daily(conn: &Connection) -> Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS daily_summary;")?;
    conn.execute(
        "DELETE FROM metadata WHERE key IN (?1, ?2)",
        rusqlite::params![META_DAILY_VERSION, META_DAILY_LAST_UPDATE],
    )?;
    Ok(())
}

/// Load the declared archive schema persisted at creation.
pub(crate) fn load_schema(conn: &Connection) -> Result<ArchiveSchema> {
    let json = get_meta(conn, META_ARCHIVE_SCHEMA)?.ok_or_else(|| {
        Error::NotInitialized("archive schema metadata is missing".to_string())
    })?;
    Ok(serde_json::from_str(&json)?)
}

/// Get a metadata value.
pub(crate) fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    use rusqlite::OptionalExtension;

    let value = conn
        .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

/// Set a metadata value.
pub(crate) fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = ?2",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use terralog_types::default_schema;

    fn open_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_create_archive_tables() {
        let conn = open_conn();
        create_archive(&conn, &default_schema()).unwrap();

        assert!(archive_exists(&conn).unwrap());
        assert!(table_exists(&conn, "metadata").unwrap());
        assert!(!daily_exists(&conn).unwrap());
    }

    #[test]
    fn test_schema_round_trip() {
        let conn = open_conn();
        let schema = default_schema();
        create_archive(&conn, &schema).unwrap();

        let loaded = load_schema(&conn).unwrap();
        assert_eq!(loaded, schema);
    }

    #[test]
    fn test_ensure_daily_stamps_fresh_version_only() {
        let conn = open_conn();
        create_archive(&conn, &default_schema()).unwrap();

        ensure_daily(&conn).unwrap();
        assert_eq!(
            get_meta(&conn, META_DAILY_VERSION).unwrap().as_deref(),
            Some(DAILY_SUMMARY_VERSION)
        );

        // A pre-existing version marker survives re-initialization.
        set_meta(&conn, META_DAILY_VERSION, "1.0").unwrap();
        ensure_daily(&conn).unwrap();
        assert_eq!(
            get_meta(&conn, META_DAILY_VERSION).unwrap().as_deref(),
            Some("1.0")
        );
    }

    #[test]
    fn test_drop_daily_removes_markers() {
        let conn = open_conn();
        create_archive(&conn, &default_schema()).unwrap();
        ensure_daily(&conn).unwrap();

        drop_daily(&conn).unwrap();
        assert!(!daily_exists(&conn).unwrap());
        assert!(get_meta(&conn, META_DAILY_VERSION).unwrap().is_none());
    }

    #[test]
    fn test_metadata_upsert() {
        let conn = open_conn();
        create_archive(&conn, &default_schema()).unwrap();

        assert!(get_meta(&conn, "k").unwrap().is_none());
        set_meta(&conn, "k", "a").unwrap();
        set_meta(&conn, "k", "b").unwrap();
        assert_eq!(get_meta(&conn, "k").unwrap().as_deref(), Some("b"));
    }
}
