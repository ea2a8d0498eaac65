//! Archive type-integrity scan and repair.
//!
//! The archive's observation columns are typeless at the SQLite level, so
//! a misbehaving writer can store text in a column declared `Real`. The
//! scanner streams every record in keyset-paginated batches, compares each
//! non-null value's runtime type against the declared schema type, and in
//! fix mode writes back the coerced value (or null when coercion fails) as
//! a point update. All fixes of a batch share one transaction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use terralog_types::Value;

use crate::error::{Error, Result};
use crate::queries::RecordQuery;
use crate::store::ArchiveStore;

/// Options for a type-integrity scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Repair violations instead of only reporting them.
    pub fix: bool,
    /// Compute (and report) fixes but commit nothing.
    pub dry_run: bool,
    /// Emit a progress event every this many records; 0 means the default.
    pub progress_every: u64,
    /// Records per read batch and fix transaction; 0 means the default.
    pub batch_records: u32,
    /// Cooperative cancellation flag, checked between batches.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ScanOptions {
    /// Default progress interval, in records.
    pub const DEFAULT_PROGRESS_EVERY: u64 = 1_000;
    /// Default records per batch.
    pub const DEFAULT_BATCH_RECORDS: u32 = 1_000;

    fn progress_every(&self) -> u64 {
        if self.progress_every == 0 {
            Self::DEFAULT_PROGRESS_EVERY
        } else {
            self.progress_every
        }
    }

    fn batch_records(&self) -> u32 {
        if self.batch_records == 0 {
            Self::DEFAULT_BATCH_RECORDS
        } else {
            self.batch_records
        }
    }
}

/// One value whose runtime type violates the declared column type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// Timestamp of the offending record.
    pub timestamp: i64,
    /// Column holding the offending value.
    pub column: String,
    /// The raw value as stored.
    pub before: Value,
    /// The corrected value written back; `None` in check mode, and in the
    /// anomalous case where a fix did not produce a conformant value.
    pub after: Option<Value>,
}

/// Classification of a finished scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanOutcome {
    /// No violations found.
    Clean,
    /// Violations found and all of them fixed.
    Fixed,
    /// Violations found but the scan was check-only.
    Unfixed,
    /// Fix was requested but some violation was not resolved. Should not
    /// occur under the coercion table; logged as a warning.
    PartiallyFixed,
}

/// Result of a type-integrity scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    /// Total records examined.
    pub records_scanned: u64,
    /// Every violation found, in timestamp order.
    pub violations: Vec<Violation>,
    /// Summary classification.
    pub outcome: ScanOutcome,
    /// Wall-clock duration of the scan.
    pub elapsed: Duration,
}

impl ScanReport {
    /// Render the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl ArchiveStore {
    /// Stream every archive record and verify each value's runtime type
    /// against the declared schema type.
    pub fn scan_types(&self, opts: &ScanOptions) -> Result<ScanReport> {
        let started = Instant::now();
        let progress_every = opts.progress_every();
        let batch = opts.batch_records();

        let mut records_scanned = 0u64;
        let mut violations = Vec::new();
        let mut last_ts: Option<i64> = None;

        loop {
            if let Some(cancel) = &opts.cancel {
                if cancel.load(Ordering::Relaxed) {
                    return Err(Error::Interrupted);
                }
            }

            let mut query = RecordQuery::new().oldest_first().limit(batch);
            if let Some(last) = last_ts {
                query = query.since(last + 1);
            }
            let records = self.records(&query)?;
            if records.is_empty() {
                break;
            }

            let tx = self.begin()?;
            for record in &records {
                records_scanned += 1;
                for column in self.schema().observations() {
                    let Some(value) = record.get(&column.name) else {
                        continue;
                    };
                    if value.conforms_to(column.column_type) {
                        continue;
                    }

                    let after = if opts.fix {
                        let coerced = value.coerce_to(column.column_type);
                        if coerced.conforms_to(column.column_type) {
                            self.update_value(record.timestamp, &column.name, &coerced)?;
                            Some(coerced)
                        } else {
                            None
                        }
                    } else {
                        None
                    };

                    violations.push(Violation {
                        timestamp: record.timestamp,
                        column: column.name.clone(),
                        before: value.clone(),
                        after,
                    });
                }

                if records_scanned % progress_every == 0 {
                    debug!(records_scanned, "type scan progress");
                }
            }
            if opts.dry_run {
                tx.rollback()?;
            } else {
                tx.commit()?;
            }

            last_ts = records.last().map(|r| r.timestamp);
        }

        let outcome = if violations.is_empty() {
            ScanOutcome::Clean
        } else if !opts.fix {
            ScanOutcome::Unfixed
        } else if violations.iter().all(|v| v.after.is_some()) {
            ScanOutcome::Fixed
        } else {
            warn!(
                unresolved = violations.iter().filter(|v| v.after.is_none()).count(),
                "fix requested but some violations were not resolved"
            );
            ScanOutcome::PartiallyFixed
        };

        let elapsed = started.elapsed();
        info!(
            records_scanned,
            violations = violations.len(),
            ?outcome,
            dry_run = opts.dry_run,
            ?elapsed,
            "type scan finished"
        );
        Ok(ScanReport {
            records_scanned,
            violations,
            outcome,
            elapsed,
        })
    }
}
