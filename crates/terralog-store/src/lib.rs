//! SQLite archive store and maintenance engine for Terralog.
//!
//! This crate persists the observation archive of a Terralog data logger
//! and maintains its derived daily-summary tables:
//!
//! - Incremental daily summary rebuilds over bounded transaction chunks
//! - One-time migration of summaries to interval-weighted statistics
//! - Idempotent recomputation of daily maxima from archive data
//! - Type-integrity scans with an optional coercion-based repair pass
//! - Transfer and unit-system reconfiguration into freshly created stores
//!
//! Every operation reports elapsed wall-clock time, supports a dry-run
//! mode that performs all computation but commits nothing, and treats
//! chunk transactions as the sole unit of atomicity.
//!
//! # Example
//!
//! ```no_run
//! use terralog_store::{ArchiveStore, RebuildOptions};
//!
//! let store = ArchiveStore::open(terralog_store::default_db_path())?;
//! let summary = store.rebuild_daily(&RebuildOptions::default())?;
//! println!("{} records over {} days", summary.records_processed, summary.days_rebuilt);
//! # Ok::<(), terralog_store::Error>(())
//! ```

mod accum;
mod backfill;
mod error;
mod integrity;
mod queries;
mod recalc;
mod schema;
mod store;
mod summary;
mod transfer;
mod weighting;

pub use accum::{DayAccumulator, WeightingParams, apply_record};
pub use backfill::{RebuildOptions, RebuildSummary};
pub use error::{Error, Result};
pub use integrity::{ScanOptions, ScanOutcome, ScanReport, Violation};
pub use queries::RecordQuery;
pub use recalc::{RecalcOptions, RecalcOutcome};
pub use schema::DAILY_SUMMARY_VERSION;
pub use store::{Aggregate, ArchiveStore};
pub use summary::DailySummaryRow;
pub use transfer::{TransferOptions, TransferOutcome};
pub use weighting::{WeightingOptions, WeightingOutcome};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/terralog/archive.db`
/// - macOS: `~/Library/Application Support/terralog/archive.db`
/// - Windows: `C:\Users\<user>\AppData\Local\terralog\archive.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("terralog")
        .join("archive.db")
}
