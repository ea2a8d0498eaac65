//! One-time migration of daily summaries to interval-weighted statistics.
//!
//! Stores created before the weighted schema carry version "1.0" daily
//! summaries whose wsum/wtime fields were never populated. The migration
//! re-derives both fields for every (observation, day) row from archive
//! records, in chunked transactions, and then bumps the version marker.
//! It is monotonic: a store at version "2.0" or later reports
//! [`WeightingOutcome::AlreadyApplied`] and performs zero writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::accum::{DayAccumulator, WeightingParams, apply_record};
use crate::error::{Error, Result};
use crate::schema;
use crate::store::{ArchiveStore, DAY_SECS};

/// Options for the interval weighting migration.
#[derive(Debug, Clone, Default)]
pub struct WeightingOptions {
    /// Days per transaction chunk; 0 means the default.
    pub chunk_days: u32,
    /// Interval-weighting parameters.
    pub params: WeightingParams,
    /// Compute everything, persist nothing, leave the version unchanged.
    pub dry_run: bool,
    /// Cooperative cancellation flag, checked between chunks.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl WeightingOptions {
    /// Default days per transaction chunk.
    pub const DEFAULT_CHUNK_DAYS: u32 = 100;

    fn chunk_days(&self) -> usize {
        if self.chunk_days == 0 {
            Self::DEFAULT_CHUNK_DAYS as usize
        } else {
            self.chunk_days as usize
        }
    }
}

/// Outcome of the interval weighting migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightingOutcome {
    /// The store was already at the weighted version; nothing was done.
    AlreadyApplied,
    /// The migration ran to completion.
    Applied {
        /// Days whose rows were re-derived.
        days_updated: u64,
        /// Wall-clock duration of the run.
        elapsed: Duration,
    },
}

impl ArchiveStore {
    /// Upgrade the daily summary store to interval-weighted statistics.
    pub fn migrate_weighting(&self, opts: &WeightingOptions) -> Result<WeightingOutcome> {
        let started = Instant::now();

        if !self.has_daily_tables()? {
            return Err(Error::NotInitialized(
                "daily summary tables do not exist".to_string(),
            ));
        }

        // A summary without a marker predates version tracking entirely.
        let version = self.daily_version()?.unwrap_or_else(|| "1.0".to_string());
        let numeric: f64 = version.parse().map_err(|_| Error::InvalidMetadata {
            key: schema::META_DAILY_VERSION.to_string(),
            value: version.clone(),
        })?;
        if numeric >= 2.0 {
            debug!(%version, "interval weighting already applied");
            return Ok(WeightingOutcome::AlreadyApplied);
        }

        let days = self.daily_days(None)?;
        let mut days_updated = 0u64;

        for chunk in days.chunks(opts.chunk_days()) {
            if let Some(cancel) = &opts.cancel {
                if cancel.load(Ordering::Relaxed) {
                    return Err(Error::Interrupted);
                }
            }

            let tx = self.begin()?;
            for &day in chunk {
                let records = self.records_between(day, day + DAY_SECS)?;
                let mut prev = self.prev_timestamp(day)?;

                let mut accumulators = std::collections::BTreeMap::<String, DayAccumulator>::new();
                for record in &records {
                    let weight = opts.params.weight(prev, record.timestamp);
                    apply_record(&mut accumulators, record, weight);
                    prev = Some(record.timestamp);
                }

                let mut changed = 0usize;
                for (obs, acc) in &accumulators {
                    changed += tx.execute(
                        "UPDATE daily_summary SET wsum = ?1, wtime = ?2
                         WHERE obs = ?3 AND day_start = ?4",
                        rusqlite::params![acc.wsum, acc.wtime, obs, day],
                    )?;
                }
                if changed > 0 {
                    days_updated += 1;
                }
            }

            if opts.dry_run {
                tx.rollback()?;
            } else {
                tx.commit()?;
            }
            debug!(chunk_days = chunk.len(), "migrated weighting chunk");
        }

        if !opts.dry_run {
            schema::set_meta(
                self.raw(),
                schema::META_DAILY_VERSION,
                schema::DAILY_SUMMARY_VERSION,
            )?;
        }

        let elapsed = started.elapsed();
        info!(
            days_updated,
            dry_run = opts.dry_run,
            ?elapsed,
            "interval weighting migration finished"
        );
        Ok(WeightingOutcome::Applied {
            days_updated,
            elapsed,
        })
    }
}
