//! Daily summary rows and their store accessors.

use rusqlite::Connection;
use serde::Serialize;

use crate::accum::DayAccumulator;
use crate::error::Result;
use crate::store::ArchiveStore;

/// One daily accumulator row, keyed by (observation, day start).
///
/// `day_start` is the unix timestamp of local midnight under the store's
/// UTC offset. A row with count 0 holds the empty sentinel state: sum 0
/// and null min/max fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummaryRow {
    /// Observation column name.
    pub obs: String,
    /// Unix timestamp of local midnight.
    pub day_start: i64,
    /// Number of values folded in.
    pub count: u64,
    /// Sum of values.
    pub sum: f64,
    /// Smallest value of the day.
    pub min: Option<f64>,
    /// Timestamp of the first occurrence of `min`.
    pub min_time: Option<i64>,
    /// Largest value of the day.
    pub max: Option<f64>,
    /// Timestamp of the first occurrence of `max`.
    pub max_time: Option<i64>,
    /// Interval-weighted sum.
    pub wsum: f64,
    /// Total weight seconds behind `wsum`.
    pub wtime: i64,
}

impl DailySummaryRow {
    /// Build a row from an accumulator.
    pub fn from_accumulator(obs: &str, day_start: i64, acc: &DayAccumulator) -> Self {
        Self {
            obs: obs.to_string(),
            day_start,
            count: acc.count,
            sum: acc.sum,
            min: acc.min,
            min_time: acc.min_time,
            max: acc.max,
            max_time: acc.max_time,
            wsum: acc.wsum,
            wtime: acc.wtime,
        }
    }

    /// Time-weighted mean of the day, when weights were accumulated.
    pub fn weighted_avg(&self) -> Option<f64> {
        (self.wtime > 0).then(|| self.wsum / self.wtime as f64)
    }
}

const ROW_COLUMNS: &str =
    "obs, day_start, count, sum, min, min_time, max, max_time, wsum, wtime";

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailySummaryRow> {
    Ok(DailySummaryRow {
        obs: row.get(0)?,
        day_start: row.get(1)?,
        count: row.get::<_, i64>(2)? as u64,
        sum: row.get(3)?,
        min: row.get(4)?,
        min_time: row.get(5)?,
        max: row.get(6)?,
        max_time: row.get(7)?,
        wsum: row.get(8)?,
        wtime: row.get(9)?,
    })
}

/// Write one summary row, replacing any previous row for its key.
pub(crate) fn upsert_row(conn: &Connection, row: &DailySummaryRow) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO daily_summary ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            ROW_COLUMNS
        ),
        rusqlite::params![
            row.obs,
            row.day_start,
            row.count as i64,
            row.sum,
            row.min,
            row.min_time,
            row.max,
            row.max_time,
            row.wsum,
            row.wtime,
        ],
    )?;
    Ok(())
}

// Daily summary reads
impl ArchiveStore {
    /// All summary rows, optionally restricted to one observation,
    /// ordered by observation then day.
    pub fn daily_rows(&self, obs: Option<&str>) -> Result<Vec<DailySummaryRow>> {
        if !self.has_daily_tables()? {
            return Ok(Vec::new());
        }

        let (sql, params) = match obs {
            Some(obs) => (
                format!(
                    "SELECT {} FROM daily_summary WHERE obs = ? ORDER BY obs, day_start",
                    ROW_COLUMNS
                ),
                vec![obs.to_string()],
            ),
            None => (
                format!(
                    "SELECT {} FROM daily_summary ORDER BY obs, day_start",
                    ROW_COLUMNS
                ),
                Vec::new(),
            ),
        };

        let mut stmt = self.raw().prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), row_from_sql)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// One summary row, if present.
    pub fn daily_row(&self, obs: &str, day_start: i64) -> Result<Option<DailySummaryRow>> {
        use rusqlite::OptionalExtension;

        if !self.has_daily_tables()? {
            return Ok(None);
        }

        let row = self
            .raw()
            .query_row(
                &format!(
                    "SELECT {} FROM daily_summary WHERE obs = ?1 AND day_start = ?2",
                    ROW_COLUMNS
                ),
                rusqlite::params![obs, day_start],
                row_from_sql,
            )
            .optional()?;
        Ok(row)
    }

    /// Distinct day starts present in the summary, ascending, optionally
    /// restricted to one observation.
    pub fn daily_days(&self, obs: Option<&str>) -> Result<Vec<i64>> {
        if !self.has_daily_tables()? {
            return Ok(Vec::new());
        }

        let (sql, params) = match obs {
            Some(obs) => (
                "SELECT DISTINCT day_start FROM daily_summary WHERE obs = ? ORDER BY day_start",
                vec![obs.to_string()],
            ),
            None => (
                "SELECT DISTINCT day_start FROM daily_summary ORDER BY day_start",
                Vec::new(),
            ),
        };

        let mut stmt = self.raw().prepare(sql)?;
        let days = stmt
            .query_map(rusqlite::params_from_iter(params), |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terralog_types::{UnitSystem, default_schema};

    #[test]
    fn test_row_round_trip() {
        let store =
            ArchiveStore::create_in_memory(default_schema(), Some(UnitSystem::Metric)).unwrap();
        crate::schema::ensure_daily(store.raw()).unwrap();

        let mut acc = DayAccumulator::new();
        acc.add_weighted(100, 20.0, 300);
        acc.add_weighted(400, 24.0, 300);
        let row = DailySummaryRow::from_accumulator("temperature", 0, &acc);

        upsert_row(store.raw(), &row).unwrap();
        let back = store.daily_row("temperature", 0).unwrap().unwrap();
        assert_eq!(back, row);
        assert_eq!(back.weighted_avg(), Some(22.0));

        assert_eq!(store.daily_rows(None).unwrap().len(), 1);
        assert_eq!(store.daily_rows(Some("rain")).unwrap().len(), 0);
        assert_eq!(store.daily_days(Some("temperature")).unwrap(), vec![0]);
    }

    #[test]
    fn test_reads_without_tables() {
        let store =
            ArchiveStore::create_in_memory(default_schema(), Some(UnitSystem::Metric)).unwrap();
        assert!(store.daily_rows(None).unwrap().is_empty());
        assert!(store.daily_row("temperature", 0).unwrap().is_none());
        assert!(store.daily_days(None).unwrap().is_empty());
    }
}
