//! Daily summary rebuild over a date range.
//!
//! The rebuild walks the requested range in chunks of whole days, one
//! transaction per chunk: existing summary rows for the chunk's days are
//! deleted and rebuilt from the archive records, so re-running any range
//! produces identical rows. A driver failure aborts only the current
//! chunk; chunks committed before it remain valid.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use time::Date;
use tracing::{debug, info};

use crate::accum::{DayAccumulator, WeightingParams, apply_record};
use crate::error::{Error, Result};
use crate::schema;
use crate::store::{ArchiveStore, DAY_SECS};
use crate::summary::{DailySummaryRow, upsert_row};

/// Options for a daily summary rebuild.
#[derive(Debug, Clone, Default)]
pub struct RebuildOptions {
    /// First day to rebuild; unbounded towards the oldest record if unset.
    pub start: Option<Date>,
    /// Last day to rebuild (inclusive); unbounded towards the newest
    /// record if unset.
    pub stop: Option<Date>,
    /// Days per transaction chunk; 0 means the default.
    pub chunk_days: u32,
    /// Interval-weighting parameters for the weighted accumulator fields.
    pub params: WeightingParams,
    /// Compute everything but commit nothing.
    pub dry_run: bool,
    /// Cooperative cancellation flag, checked between chunks.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl RebuildOptions {
    /// Default days per transaction chunk.
    pub const DEFAULT_CHUNK_DAYS: u32 = 30;

    fn chunk_days(&self) -> i64 {
        if self.chunk_days == 0 {
            i64::from(Self::DEFAULT_CHUNK_DAYS)
        } else {
            i64::from(self.chunk_days)
        }
    }
}

/// Result of a daily summary rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildSummary {
    /// Archive records folded into accumulators.
    pub records_processed: u64,
    /// Distinct days whose summary rows were rebuilt.
    pub days_rebuilt: u64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl ArchiveStore {
    /// Rebuild daily summary rows for a date range.
    ///
    /// Missing daily tables are created first (the initialize-on-demand
    /// contract); in a dry run they are created inside each chunk's
    /// transaction and rolled back with it.
    pub fn rebuild_daily(&self, opts: &RebuildOptions) -> Result<RebuildSummary> {
        let started = Instant::now();

        if !opts.dry_run {
            schema::ensure_daily(self.raw())?;
        }

        let span = self.timestamp_range()?;
        let start_day = match (opts.start, span) {
            (Some(date), _) => Some(self.date_day_start(date)),
            (None, Some((oldest, _))) => Some(self.day_start(oldest)),
            (None, None) => None,
        };
        let stop_day = match (opts.stop, span) {
            (Some(date), _) => Some(self.date_day_start(date)),
            (None, Some((_, newest))) => Some(self.day_start(newest)),
            (None, None) => None,
        };

        let (Some(start_day), Some(stop_day)) = (start_day, stop_day) else {
            debug!("Nothing to rebuild: archive is empty and the range is unbounded");
            return Ok(RebuildSummary {
                records_processed: 0,
                days_rebuilt: 0,
                elapsed: started.elapsed(),
            });
        };
        if start_day > stop_day {
            return Ok(RebuildSummary {
                records_processed: 0,
                days_rebuilt: 0,
                elapsed: started.elapsed(),
            });
        }

        let chunk_span = opts.chunk_days() * DAY_SECS;
        let mut records_processed = 0u64;
        let mut days_rebuilt = 0u64;
        let mut newest_seen: Option<i64> = None;

        let mut chunk_lo = start_day;
        while chunk_lo <= stop_day {
            if let Some(cancel) = &opts.cancel {
                if cancel.load(Ordering::Relaxed) {
                    return Err(Error::Interrupted);
                }
            }

            // Exclusive upper bound of this chunk, capped at the range end.
            let chunk_hi = (chunk_lo + chunk_span).min(stop_day + DAY_SECS);

            let tx = self.begin()?;
            schema::ensure_daily(&tx)?;
            tx.execute(
                "DELETE FROM daily_summary WHERE day_start >= ?1 AND day_start < ?2",
                rusqlite::params![chunk_lo, chunk_hi],
            )?;

            let records = self.records_between(chunk_lo, chunk_hi)?;
            // Weight continuity across the chunk boundary: the gap of the
            // chunk's first record reaches back to the record before it.
            let mut prev = self.prev_timestamp(chunk_lo)?;

            let mut days: BTreeMap<i64, BTreeMap<String, DayAccumulator>> = BTreeMap::new();
            for record in &records {
                let weight = opts.params.weight(prev, record.timestamp);
                let day = self.day_start(record.timestamp);
                apply_record(days.entry(day).or_default(), record, weight);
                prev = Some(record.timestamp);
                newest_seen = Some(newest_seen.map_or(record.timestamp, |n: i64| n.max(record.timestamp)));
            }

            for (day, accumulators) in &days {
                for (obs, acc) in accumulators {
                    upsert_row(&tx, &DailySummaryRow::from_accumulator(obs, *day, acc))?;
                }
            }

            records_processed += records.len() as u64;
            days_rebuilt += days.len() as u64;

            if opts.dry_run {
                tx.rollback()?;
            } else {
                tx.commit()?;
            }
            debug!(
                chunk_lo,
                records = records.len(),
                days = days.len(),
                "rebuilt chunk"
            );

            chunk_lo = chunk_hi;
        }

        if !opts.dry_run {
            if let Some(newest) = newest_seen {
                schema::set_meta(
                    self.raw(),
                    schema::META_DAILY_LAST_UPDATE,
                    &newest.to_string(),
                )?;
            }
        }

        let elapsed = started.elapsed();
        info!(
            records_processed,
            days_rebuilt,
            dry_run = opts.dry_run,
            ?elapsed,
            "daily summary rebuild finished"
        );
        Ok(RebuildSummary {
            records_processed,
            days_rebuilt,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terralog_types::{ArchiveRecord, UnitSystem, default_schema};

    fn store_with_records(records: &[ArchiveRecord]) -> ArchiveStore {
        let store =
            ArchiveStore::create_in_memory(default_schema(), Some(UnitSystem::Metric)).unwrap();
        store.insert_records(records).unwrap();
        store
    }

    fn record(ts: i64, temp: f64) -> ArchiveRecord {
        ArchiveRecord::new(ts).with_value("temperature", temp)
    }

    #[test]
    fn test_rebuild_computes_day_statistics() {
        // Two days: day 0 has three records, day 1 has one.
        let store = store_with_records(&[
            record(600, 20.0),
            record(1_200, 24.0),
            record(1_800, 18.0),
            record(DAY_SECS + 600, 10.0),
        ]);

        let summary = store.rebuild_daily(&RebuildOptions::default()).unwrap();
        assert_eq!(summary.records_processed, 4);
        assert_eq!(summary.days_rebuilt, 2);

        let day0 = store.daily_row("temperature", 0).unwrap().unwrap();
        assert_eq!(day0.count, 3);
        assert!((day0.sum - 62.0).abs() < 1e-9);
        assert_eq!(day0.min, Some(18.0));
        assert_eq!(day0.min_time, Some(1_800));
        assert_eq!(day0.max, Some(24.0));
        assert_eq!(day0.max_time, Some(1_200));
        assert!(day0.wtime > 0);

        let day1 = store.daily_row("temperature", DAY_SECS).unwrap().unwrap();
        assert_eq!(day1.count, 1);

        assert_eq!(
            store.daily_version().unwrap().as_deref(),
            Some(schema::DAILY_SUMMARY_VERSION)
        );
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let store = store_with_records(&[
            record(600, 20.0),
            record(1_200, 24.0),
            record(DAY_SECS + 600, 10.0),
        ]);

        store.rebuild_daily(&RebuildOptions::default()).unwrap();
        let first = store.daily_rows(None).unwrap();

        let again = store.rebuild_daily(&RebuildOptions::default()).unwrap();
        assert_eq!(again.records_processed, 3);
        assert_eq!(store.daily_rows(None).unwrap(), first);
    }

    #[test]
    fn test_chunking_transparency() {
        // Records spread over five days with a day-boundary-straddling gap.
        let mut records = Vec::new();
        for day in 0..5i64 {
            for slot in 0..4i64 {
                let ts = day * DAY_SECS + slot * 7_200 + 300;
                records.push(record(ts, (day * 4 + slot) as f64));
            }
        }
        let one_chunk = store_with_records(&records);
        let many_chunks = store_with_records(&records);

        one_chunk
            .rebuild_daily(&RebuildOptions {
                chunk_days: 1_000,
                ..Default::default()
            })
            .unwrap();
        many_chunks
            .rebuild_daily(&RebuildOptions {
                chunk_days: 1,
                ..Default::default()
            })
            .unwrap();

        // Identical rows, weighted fields included.
        assert_eq!(
            one_chunk.daily_rows(None).unwrap(),
            many_chunks.daily_rows(None).unwrap()
        );
    }

    #[test]
    fn test_rebuild_respects_date_range() {
        let store = store_with_records(&[
            record(600, 20.0),                // 1970-01-01
            record(DAY_SECS + 600, 10.0),     // 1970-01-02
            record(2 * DAY_SECS + 600, 30.0), // 1970-01-03
        ]);

        let opts = RebuildOptions {
            start: Some(time::macros::date!(1970 - 01 - 02)),
            stop: Some(time::macros::date!(1970 - 01 - 02)),
            ..Default::default()
        };
        let summary = store.rebuild_daily(&opts).unwrap();
        assert_eq!(summary.records_processed, 1);
        assert_eq!(summary.days_rebuilt, 1);

        assert!(store.daily_row("temperature", 0).unwrap().is_none());
        assert!(store.daily_row("temperature", DAY_SECS).unwrap().is_some());
    }

    #[test]
    fn test_rebuild_drops_stale_rows() {
        let store = store_with_records(&[record(600, 20.0)]);
        store.rebuild_daily(&RebuildOptions::default()).unwrap();

        // A stale row for a day the archive no longer covers.
        upsert_row(
            store.raw(),
            &DailySummaryRow::from_accumulator("temperature", 0, &{
                let mut acc = DayAccumulator::new();
                acc.add(1, 999.0);
                acc
            }),
        )
        .unwrap();

        store.rebuild_daily(&RebuildOptions::default()).unwrap();
        let row = store.daily_row("temperature", 0).unwrap().unwrap();
        assert_eq!(row.max, Some(20.0));
    }

    #[test]
    fn test_dry_run_leaves_store_untouched() {
        let store = store_with_records(&[record(600, 20.0)]);

        let summary = store
            .rebuild_daily(&RebuildOptions {
                dry_run: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(summary.records_processed, 1);
        assert_eq!(summary.days_rebuilt, 1);

        // No tables, no rows, no version marker.
        assert!(!store.has_daily_tables().unwrap());
        assert!(store.daily_version().unwrap().is_none());
    }

    #[test]
    fn test_empty_archive_is_zero_work() {
        let store =
            ArchiveStore::create_in_memory(default_schema(), Some(UnitSystem::Metric)).unwrap();
        let summary = store.rebuild_daily(&RebuildOptions::default()).unwrap();
        assert_eq!(summary.records_processed, 0);
        assert_eq!(summary.days_rebuilt, 0);
        // Initialize-on-demand still creates the tables.
        assert!(store.has_daily_tables().unwrap());
    }

    #[test]
    fn test_cancellation_between_chunks() {
        let store = store_with_records(&[record(600, 20.0), record(DAY_SECS + 600, 10.0)]);
        let cancel = Arc::new(AtomicBool::new(true));

        let err = store
            .rebuild_daily(&RebuildOptions {
                cancel: Some(cancel),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::Interrupted));
    }
}
