//! Idempotent recomputation of the daily maximum for one observation.
//!
//! The recomputation derives strictly from archive data: for every day of
//! the observation in the summary store, the max becomes the archive-wide
//! maximum over that day and max_time the earliest timestamp holding it.
//! Running it twice therefore yields the same rows.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{ArchiveStore, DAY_SECS};

/// Options for a daily maximum recomputation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecalcOptions {
    /// Compute everything but commit nothing.
    pub dry_run: bool,
}

/// Outcome of a daily maximum recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcOutcome {
    /// The observation has no data anywhere in the archive; the summary
    /// store was left untouched. A successful completion, not a failure.
    NoData,
    /// The maxima were recomputed.
    Recalculated {
        /// Days whose row was rewritten.
        days_updated: u64,
        /// Wall-clock duration of the run.
        elapsed: Duration,
    },
}

impl ArchiveStore {
    /// Recompute max and max_time of one observation across every day in
    /// the summary store, independent of the summary schema version.
    pub fn recalc_daily_max(&self, obs: &str, opts: &RecalcOptions) -> Result<RecalcOutcome> {
        let started = Instant::now();
        self.require_observation(obs)?;

        if !self.has_daily_tables()? {
            return Err(Error::NotInitialized(
                "daily summary tables do not exist".to_string(),
            ));
        }

        let archive_wide = self.aggregate(obs, None, None)?;
        if archive_wide.count == 0 {
            debug!(obs, "no archive data for observation");
            return Ok(RecalcOutcome::NoData);
        }

        let days = self.daily_days(Some(obs))?;
        let mut days_updated = 0u64;

        let tx = self.begin()?;
        for &day in &days {
            let changed = match self.time_of_max(obs, day, day + DAY_SECS)? {
                Some((max, max_time)) => tx.execute(
                    "UPDATE daily_summary SET max = ?1, max_time = ?2
                     WHERE obs = ?3 AND day_start = ?4",
                    rusqlite::params![max, max_time, obs, day],
                )?,
                // A summary day the archive no longer covers: empty state.
                None => tx.execute(
                    "UPDATE daily_summary SET max = NULL, max_time = NULL
                     WHERE obs = ?1 AND day_start = ?2",
                    rusqlite::params![obs, day],
                )?,
            };
            days_updated += changed as u64;
        }

        if opts.dry_run {
            tx.rollback()?;
        } else {
            tx.commit()?;
        }

        let elapsed = started.elapsed();
        info!(
            obs,
            days_updated,
            dry_run = opts.dry_run,
            ?elapsed,
            "daily maximum recomputation finished"
        );
        Ok(RecalcOutcome::Recalculated {
            days_updated,
            elapsed,
        })
    }
}
