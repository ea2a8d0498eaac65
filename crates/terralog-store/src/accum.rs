//! Running daily statistics for a single observation.
//!
//! The accumulator is pure: records flow in through [`DayAccumulator::add`]
//! or [`apply_record`], storage never enters the picture. The backfill and
//! weighting engines fold archive records through accumulators and persist
//! the results at chunk boundaries.

use std::collections::BTreeMap;

use terralog_types::ArchiveRecord;

/// Interval-weighting parameters.
///
/// A record's weight is the gap to the previous record, capped at
/// `max_interval_secs` so a long data gap does not overweight the record
/// that ends it. The first record of an archive, and non-positive gaps
/// from duplicate or regressive timestamps, fall back to
/// `fallback_interval_secs`.
#[derive(Debug, Clone, Copy)]
pub struct WeightingParams {
    /// Largest plausible gap between consecutive records, in seconds.
    pub max_interval_secs: i64,
    /// Weight used when no previous record exists or the gap is invalid.
    pub fallback_interval_secs: i64,
}

impl Default for WeightingParams {
    fn default() -> Self {
        Self {
            max_interval_secs: 3_600,
            fallback_interval_secs: 300,
        }
    }
}

impl WeightingParams {
    /// Weight in seconds of a record at `ts` whose predecessor is `prev`.
    pub fn weight(&self, prev: Option<i64>, ts: i64) -> i64 {
        match prev {
            Some(prev) if ts > prev => (ts - prev).min(self.max_interval_secs),
            _ => self.fallback_interval_secs,
        }
    }
}

/// Running statistics of one observation over one day.
///
/// The empty state (no values seen) has count 0, sum 0, and no min/max;
/// min/max replacement uses strict inequality, so of several equal
/// extremes the earliest timestamp is retained.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DayAccumulator {
    /// Number of values folded in.
    pub count: u64,
    /// Sum of values.
    pub sum: f64,
    /// Smallest value seen.
    pub min: Option<f64>,
    /// Timestamp of the first occurrence of `min`.
    pub min_time: Option<i64>,
    /// Largest value seen.
    pub max: Option<f64>,
    /// Timestamp of the first occurrence of `max`.
    pub max_time: Option<i64>,
    /// Interval-weighted sum of values.
    pub wsum: f64,
    /// Total weight folded into `wsum`, in seconds.
    pub wtime: i64,
}

impl DayAccumulator {
    /// The empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no value has been folded in.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Fold in one value without interval weighting.
    pub fn add(&mut self, timestamp: i64, value: f64) {
        self.count += 1;
        self.sum += value;

        match self.min {
            Some(current) if value >= current => {}
            _ => {
                self.min = Some(value);
                self.min_time = Some(timestamp);
            }
        }
        match self.max {
            Some(current) if value <= current => {}
            _ => {
                self.max = Some(value);
                self.max_time = Some(timestamp);
            }
        }
    }

    /// Fold in one value with an interval weight in seconds.
    pub fn add_weighted(&mut self, timestamp: i64, value: f64, weight_secs: i64) {
        self.add(timestamp, value);
        self.wsum += value * weight_secs as f64;
        self.wtime += weight_secs;
    }

    /// Unweighted mean of the folded values.
    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Time-weighted mean of the folded values.
    pub fn weighted_avg(&self) -> Option<f64> {
        (self.wtime > 0).then(|| self.wsum / self.wtime as f64)
    }
}

/// Fold one record into per-observation accumulators.
///
/// Every numeric, non-null observation of the record is applied with the
/// given weight; text and null values contribute nothing.
pub fn apply_record(
    accumulators: &mut BTreeMap<String, DayAccumulator>,
    record: &ArchiveRecord,
    weight_secs: i64,
) {
    for (name, value) in &record.values {
        if let Some(v) = value.as_f64() {
            accumulators
                .entry(name.clone())
                .or_default()
                .add_weighted(record.timestamp, v, weight_secs);
        }
    }
}
