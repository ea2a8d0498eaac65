//! Main archive store implementation.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, Transaction};
use time::{Date, UtcOffset};
use tracing::{debug, info};

use terralog_types::{ArchiveRecord, ArchiveSchema, TIMESTAMP_COLUMN, UnitSystem, Value};

use crate::error::{Error, Result};
use crate::queries::RecordQuery;
use crate::schema;

/// Seconds in a calendar day under a fixed UTC offset.
pub(crate) const DAY_SECS: i64 = 86_400;

/// Path marker for in-memory stores.
const MEMORY_PATH: &str = ":memory:";

/// Aggregate statistics of one observation over a time span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    /// Number of non-null values.
    pub count: u64,
    /// Sum of values; 0 when count is 0.
    pub sum: f64,
    /// Smallest value, if any.
    pub min: Option<f64>,
    /// Largest value, if any.
    pub max: Option<f64>,
}

/// SQLite-backed archive store for Terralog observation records.
///
/// One store owns one database holding the `archive` table, the
/// `daily_summary` rollup table, and a `metadata` key/value table carrying
/// the declared schema, the unit system tag, and the daily summary schema
/// version. The maintenance engine operations are implemented in their own
/// modules as further `impl ArchiveStore` blocks.
#[derive(Debug)]
pub struct ArchiveStore {
    conn: Connection,
    path: PathBuf,
    schema: ArchiveSchema,
    tz_offset: UtcOffset,
}

impl ArchiveStore {
    /// Open an existing, initialized store.
    ///
    /// Fails with [`Error::NotInitialized`] when the file or its archive
    /// tables are missing; use [`ArchiveStore::open_or_create`] to
    /// initialize on demand.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotInitialized(format!(
                "no database at {}",
                path.display()
            )));
        }

        info!("Opening archive at {}", path.display());
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;

        if !schema::archive_exists(&conn)? {
            return Err(Error::NotInitialized(format!(
                "{} has no archive table",
                path.display()
            )));
        }
        let schema = schema::load_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            schema,
            tz_offset: UtcOffset::UTC,
        })
    }

    /// Open a store, initializing it with `schema` and `unit_system` if
    /// the database or its archive tables do not exist yet.
    ///
    /// Opening an existing store verifies that its persisted schema equals
    /// the one supplied; a difference is a [`Error::SchemaMismatch`].
    pub fn open_or_create<P: AsRef<Path>>(
        path: P,
        schema: ArchiveSchema,
        unit_system: Option<UnitSystem>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Self::create(path, schema, unit_system);
        }

        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;

        if schema::archive_exists(&conn)? {
            let stored = schema::load_schema(&conn)?;
            if stored != schema {
                return Err(Error::SchemaMismatch(format!(
                    "stored schema of {} differs from the requested one",
                    path.display()
                )));
            }
        } else {
            initialize(&conn, &schema, unit_system)?;
            info!("Initialized archive at {}", path.display());
        }

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            schema,
            tz_offset: UtcOffset::UTC,
        })
    }

    /// Create a fresh store at a path that must not exist yet.
    ///
    /// An existing path is [`Error::AlreadyExists`]; the engine never
    /// silently overwrites a store.
    pub fn create<P: AsRef<Path>>(
        path: P,
        schema: ArchiveSchema,
        unit_system: Option<UnitSystem>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(Error::AlreadyExists(path.to_path_buf()));
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Creating archive at {}", path.display());
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        initialize(&conn, &schema, unit_system)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            schema,
            tz_offset: UtcOffset::UTC,
        })
    }

    /// Create an in-memory store (for testing and dry runs).
    pub fn create_in_memory(
        schema: ArchiveSchema,
        unit_system: Option<UnitSystem>,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize(&conn, &schema, unit_system)?;
        Ok(Self {
            conn,
            path: PathBuf::from(MEMORY_PATH),
            schema,
            tz_offset: UtcOffset::UTC,
        })
    }

    /// Pin the UTC offset used for local-time day boundaries.
    ///
    /// Defaults to UTC. The offset is fixed for the life of the store
    /// handle; daylight-saving shifts are outside the day-bucketing model.
    #[must_use]
    pub fn with_tz_offset(mut self, offset: UtcOffset) -> Self {
        self.tz_offset = offset;
        self
    }

    /// The store's database path; `":memory:"` for in-memory stores.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this store lives only in memory.
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_PATH
    }

    /// The declared archive schema.
    pub fn schema(&self) -> &ArchiveSchema {
        &self.schema
    }

    /// The UTC offset day boundaries are computed against.
    pub fn tz_offset(&self) -> UtcOffset {
        self.tz_offset
    }

    pub(crate) fn raw(&self) -> &Connection {
        &self.conn
    }

    /// Begin a chunk transaction.
    ///
    /// `unchecked_transaction` keeps `&self` receivers workable; the
    /// engine is single-threaded and never nests transactions.
    pub(crate) fn begin(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // === Day bucketing ===

    /// Unix timestamp of local midnight of the day containing `ts`.
    pub fn day_start(&self, ts: i64) -> i64 {
        let off = i64::from(self.tz_offset.whole_seconds());
        (ts + off).div_euclid(DAY_SECS) * DAY_SECS - off
    }

    /// Unix timestamp of local midnight of a calendar date.
    pub fn date_day_start(&self, date: Date) -> i64 {
        date.midnight().assume_offset(self.tz_offset).unix_timestamp()
    }

    // === Metadata ===

    /// Get a metadata value.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        schema::get_meta(&self.conn, key)
    }

    /// Set a metadata value.
    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        schema::set_meta(&self.conn, key, value)
    }

    /// The store's unit system, if one was established at initialization.
    pub fn unit_system(&self) -> Result<Option<UnitSystem>> {
        match self.get_metadata(schema::META_UNIT_SYSTEM)? {
            None => Ok(None),
            Some(raw) => {
                let tag: i64 = raw.parse().map_err(|_| Error::InvalidMetadata {
                    key: schema::META_UNIT_SYSTEM.to_string(),
                    value: raw.clone(),
                })?;
                let system = UnitSystem::try_from(tag).map_err(|_| Error::InvalidMetadata {
                    key: schema::META_UNIT_SYSTEM.to_string(),
                    value: raw,
                })?;
                Ok(Some(system))
            }
        }
    }

    /// The daily summary schema version, if the summary was ever created.
    pub fn daily_version(&self) -> Result<Option<String>> {
        self.get_metadata(schema::META_DAILY_VERSION)
    }

    /// Whether the daily summary tables exist.
    pub fn has_daily_tables(&self) -> Result<bool> {
        schema::daily_exists(&self.conn)
    }

    /// Drop the daily summary wholesale.
    ///
    /// The summary must be fully rebuilt (see `rebuild_daily`) before its
    /// next read.
    pub fn drop_daily_summary(&self) -> Result<()> {
        info!("Dropping daily summary tables of {}", self.path.display());
        schema::drop_daily(&self.conn)
    }
}

// Record operations
impl ArchiveStore {
    /// Append one observation record.
    pub fn insert_record(&self, record: &ArchiveRecord) -> Result<()> {
        self.validate_record(record)?;
        let sql = self.insert_sql();
        self.conn
            .execute(&sql, rusqlite::params_from_iter(self.insert_params(record)))?;
        Ok(())
    }

    /// Append a batch of records in one transaction.
    pub fn insert_records(&self, records: &[ArchiveRecord]) -> Result<usize> {
        for record in records {
            self.validate_record(record)?;
        }

        let tx = self.begin()?;
        let inserted = {
            let mut stmt = tx.prepare(&self.insert_sql())?;
            let mut inserted = 0;
            for record in records {
                inserted += stmt.execute(rusqlite::params_from_iter(self.insert_params(record)))?;
            }
            inserted
        };
        tx.commit()?;

        debug!("Inserted {} archive records", inserted);
        Ok(inserted)
    }

    fn validate_record(&self, record: &ArchiveRecord) -> Result<()> {
        for name in record.values.keys() {
            if !self.schema.has_column(name) || name == TIMESTAMP_COLUMN {
                return Err(Error::UnknownColumn(name.clone()));
            }
        }
        Ok(())
    }

    pub(crate) fn insert_sql(&self) -> String {
        let names = self
            .schema
            .columns()
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; self.schema.columns().len()].join(", ");
        format!("INSERT INTO archive ({}) VALUES ({})", names, placeholders)
    }

    pub(crate) fn insert_params(&self, record: &ArchiveRecord) -> Vec<rusqlite::types::Value> {
        let mut params = Vec::with_capacity(self.schema.columns().len());
        params.push(rusqlite::types::Value::Integer(record.timestamp));
        for column in self.schema.observations() {
            let value = record.values.get(&column.name).unwrap_or(&Value::Null);
            params.push(bind_value(value));
        }
        params
    }

    /// Query records with filters.
    pub fn records(&self, query: &RecordQuery) -> Result<Vec<ArchiveRecord>> {
        let sql = query.build_sql(&self.schema);
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                let mut record = ArchiveRecord::new(row.get(0)?);
                for (idx, column) in self.schema.observations().enumerate() {
                    let value = read_value(row, idx + 1)?;
                    if !value.is_null() {
                        record.values.insert(column.name.clone(), value);
                    }
                }
                Ok(record)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Records with `start <= timestamp < stop_excl`, oldest first.
    pub(crate) fn records_between(&self, start: i64, stop_excl: i64) -> Result<Vec<ArchiveRecord>> {
        self.records(
            &RecordQuery::new()
                .since(start)
                .until(stop_excl - 1)
                .oldest_first(),
        )
    }

    /// Rewrite a single (timestamp, column) value in place.
    ///
    /// This is the integrity scanner's repair path; the timestamp key is
    /// never touched.
    pub fn update_value(&self, timestamp: i64, column: &str, value: &Value) -> Result<()> {
        if !self.schema.has_column(column) || column == TIMESTAMP_COLUMN {
            return Err(Error::UnknownColumn(column.to_string()));
        }
        self.conn.execute(
            &format!("UPDATE archive SET \"{}\" = ?1 WHERE \"timestamp\" = ?2", column),
            rusqlite::params![bind_value(value), timestamp],
        )?;
        Ok(())
    }

    /// Total number of archive records.
    pub fn record_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM archive", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Smallest and largest record timestamps, if any records exist.
    pub fn timestamp_range(&self) -> Result<Option<(i64, i64)>> {
        let range = self.conn.query_row(
            "SELECT MIN(\"timestamp\"), MAX(\"timestamp\") FROM archive",
            [],
            |row| {
                let min: Option<i64> = row.get(0)?;
                let max: Option<i64> = row.get(1)?;
                Ok(min.zip(max))
            },
        )?;
        Ok(range)
    }

    /// Timestamp of the newest record strictly older than `before`.
    pub(crate) fn prev_timestamp(&self, before: i64) -> Result<Option<i64>> {
        let prev: Option<i64> = self.conn.query_row(
            "SELECT MAX(\"timestamp\") FROM archive WHERE \"timestamp\" < ?",
            [before],
            |row| row.get(0),
        )?;
        Ok(prev)
    }

    /// Aggregate statistics of one observation over an inclusive span.
    pub fn aggregate(&self, obs: &str, start: Option<i64>, stop: Option<i64>) -> Result<Aggregate> {
        self.require_observation(obs)?;

        let mut sql = format!(
            "SELECT COUNT(\"{obs}\"), COALESCE(SUM(\"{obs}\"), 0), MIN(\"{obs}\"), MAX(\"{obs}\")
             FROM archive WHERE \"{obs}\" IS NOT NULL",
            obs = obs
        );
        let mut params: Vec<i64> = Vec::new();
        if let Some(start) = start {
            sql.push_str(" AND \"timestamp\" >= ?");
            params.push(start);
        }
        if let Some(stop) = stop {
            sql.push_str(" AND \"timestamp\" <= ?");
            params.push(stop);
        }

        let aggregate = self.conn.query_row(
            &sql,
            rusqlite::params_from_iter(params),
            |row| {
                let count: i64 = row.get(0)?;
                let sum: f64 = row.get(1)?;
                let min = read_value(row, 2)?.as_f64();
                let max = read_value(row, 3)?.as_f64();
                Ok(Aggregate {
                    count: count as u64,
                    sum,
                    min,
                    max,
                })
            },
        )?;
        Ok(aggregate)
    }

    /// Largest value of an observation in `start <= timestamp < stop_excl`
    /// and the earliest timestamp holding it.
    ///
    /// Returns `None` when the span has no numeric values.
    pub fn time_of_max(&self, obs: &str, start: i64, stop_excl: i64) -> Result<Option<(f64, i64)>> {
        self.require_observation(obs)?;

        let sql = format!(
            "SELECT \"{obs}\", \"timestamp\" FROM archive
             WHERE \"timestamp\" >= ?1 AND \"timestamp\" < ?2 AND \"{obs}\" IS NOT NULL
               AND \"{obs}\" = (SELECT MAX(\"{obs}\") FROM archive
                                WHERE \"timestamp\" >= ?1 AND \"timestamp\" < ?2
                                  AND \"{obs}\" IS NOT NULL)
             ORDER BY \"timestamp\" ASC LIMIT 1",
            obs = obs
        );

        let hit = self
            .conn
            .query_row(&sql, rusqlite::params![start, stop_excl], |row| {
                let value = read_value(row, 0)?;
                let ts: i64 = row.get(1)?;
                Ok((value, ts))
            })
            .optional()?;

        Ok(hit.and_then(|(value, ts)| value.as_f64().map(|v| (v, ts))))
    }

    pub(crate) fn require_observation(&self, obs: &str) -> Result<()> {
        if !self.schema.has_column(obs) || obs == TIMESTAMP_COLUMN {
            return Err(Error::UnknownColumn(obs.to_string()));
        }
        Ok(())
    }
}

fn initialize(
    conn: &Connection,
    archive_schema: &ArchiveSchema,
    unit_system: Option<UnitSystem>,
) -> Result<()> {
    schema::create_archive(conn, archive_schema)?;
    if let Some(system) = unit_system {
        schema::set_meta(conn, schema::META_UNIT_SYSTEM, &system.tag().to_string())?;
    }
    Ok(())
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    // WAL keeps long maintenance transactions from blocking readers.
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

pub(crate) fn bind_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(v) => rusqlite::types::Value::Integer(*v),
        Value::Real(v) => rusqlite::types::Value::Real(*v),
        Value::Text(v) => rusqlite::types::Value::Text(v.clone()),
    }
}

pub(crate) fn read_value(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    use rusqlite::types::ValueRef;

    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        // Foreign writers only; the engine never stores blobs.
        ValueRef::Blob(_) => Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use terralog_types::default_schema;

    fn memory_store() -> ArchiveStore {
        ArchiveStore::create_in_memory(default_schema(), Some(UnitSystem::Metric)).unwrap()
    }

    fn record(ts: i64, temp: f64) -> ArchiveRecord {
        ArchiveRecord::new(ts)
            .with_value("temperature", temp)
            .with_value("co2", 800i64)
    }

    #[test]
    fn test_create_and_metadata() {
        let store = memory_store();
        assert_eq!(store.unit_system().unwrap(), Some(UnitSystem::Metric));
        assert!(store.daily_version().unwrap().is_none());
        assert!(!store.has_daily_tables().unwrap());
        assert!(store.is_in_memory());
    }

    #[test]
    fn test_create_refuses_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");

        ArchiveStore::create(&path, default_schema(), Some(UnitSystem::Us)).unwrap();
        let err = ArchiveStore::create(&path, default_schema(), Some(UnitSystem::Us)).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_open_requires_initialized_store() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.db");
        assert!(matches!(
            ArchiveStore::open(&missing).unwrap_err(),
            Error::NotInitialized(_)
        ));

        let path = dir.path().join("archive.db");
        ArchiveStore::create(&path, default_schema(), Some(UnitSystem::Us)).unwrap();
        let reopened = ArchiveStore::open(&path).unwrap();
        assert_eq!(reopened.schema(), &default_schema());
        assert_eq!(reopened.unit_system().unwrap(), Some(UnitSystem::Us));
    }

    #[test]
    fn test_open_or_create_verifies_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");

        ArchiveStore::open_or_create(&path, default_schema(), Some(UnitSystem::Us)).unwrap();

        let other = ArchiveSchema::new(vec![terralog_types::Column::new(
            "soil_moisture",
            terralog_types::ColumnType::Real,
        )]);
        let err = ArchiveStore::open_or_create(&path, other, Some(UnitSystem::Us)).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }

    #[test]
    fn test_insert_and_query_records() {
        let store = memory_store();
        store
            .insert_records(&[record(100, 20.0), record(200, 21.0), record(300, 19.5)])
            .unwrap();

        let all = store.records(&RecordQuery::new().oldest_first()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].timestamp, 100);
        assert_eq!(all[2].timestamp, 300);

        let bounded = store.records_between(100, 300).unwrap();
        assert_eq!(bounded.len(), 2);

        assert_eq!(store.record_count().unwrap(), 3);
        assert_eq!(store.timestamp_range().unwrap(), Some((100, 300)));
        assert_eq!(store.prev_timestamp(200).unwrap(), Some(100));
        assert_eq!(store.prev_timestamp(100).unwrap(), None);
    }

    #[test]
    fn test_insert_rejects_unknown_column() {
        let store = memory_store();
        let bad = ArchiveRecord::new(100).with_value("voltage", 3.3);
        assert!(matches!(
            store.insert_record(&bad).unwrap_err(),
            Error::UnknownColumn(_)
        ));
    }

    #[test]
    fn test_update_value_preserves_runtime_type() {
        let store = memory_store();
        store.insert_record(&record(100, 20.0)).unwrap();

        // Typeless columns keep text as text, which the scanner relies on.
        store
            .update_value(100, "temperature", &Value::Text("garbled".into()))
            .unwrap();
        let rows = store.records(&RecordQuery::new()).unwrap();
        assert_eq!(
            rows[0].get("temperature"),
            Some(&Value::Text("garbled".into()))
        );

        assert!(matches!(
            store.update_value(100, "timestamp", &Value::Integer(1)),
            Err(Error::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_aggregate() {
        let store = memory_store();
        store
            .insert_records(&[record(100, 20.0), record(200, 24.0), record(300, 18.0)])
            .unwrap();

        let agg = store.aggregate("temperature", None, None).unwrap();
        assert_eq!(agg.count, 3);
        assert!((agg.sum - 62.0).abs() < 1e-9);
        assert_eq!(agg.min, Some(18.0));
        assert_eq!(agg.max, Some(24.0));

        let bounded = store.aggregate("temperature", Some(200), Some(300)).unwrap();
        assert_eq!(bounded.count, 2);

        let empty = store.aggregate("rain", None, None).unwrap();
        assert_eq!(empty.count, 0);
        assert_eq!(empty.min, None);
    }

    #[test]
    fn test_time_of_max_prefers_earliest() {
        let store = memory_store();
        store
            .insert_records(&[record(100, 20.0), record(200, 24.0), record(300, 24.0)])
            .unwrap();

        let (max, ts) = store.time_of_max("temperature", 0, 1_000).unwrap().unwrap();
        assert_eq!(max, 24.0);
        assert_eq!(ts, 200);

        assert!(store.time_of_max("rain", 0, 1_000).unwrap().is_none());
    }

    #[test]
    fn test_day_bucketing() {
        let store = memory_store();
        // 2023-11-14T22:13:20Z
        let ts = 1_700_000_000;
        let start = store.day_start(ts);
        assert_eq!(start % DAY_SECS, 0);
        assert!(ts - start < DAY_SECS);

        // At UTC-5 the local day starts five hours later in UTC terms.
        let shifted = memory_store().with_tz_offset(UtcOffset::from_hms(-5, 0, 0).unwrap());
        let local_start = shifted.day_start(ts);
        assert_eq!(local_start, start + 5 * 3600);
        assert!(ts >= local_start && ts < local_start + DAY_SECS);
    }

    #[test]
    fn test_date_day_start() {
        let store = memory_store();
        let date = time::macros::date!(2023 - 11 - 14);
        assert_eq!(store.date_day_start(date), 1_699_920_000);
    }
}
