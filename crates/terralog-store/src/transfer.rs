//! Archive transfer and unit-system reconfiguration.
//!
//! A transfer copies every source record into a freshly created
//! destination store inside one destination-side transaction, converting
//! units field-by-field when the target unit system differs from the
//! source's. The destination is never overwritten; a create collision is
//! surfaced to the caller. A failure mid-copy propagates and leaves the
//! destination unusable; discarding it is the caller's responsibility.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use terralog_types::{UnitSystem, convert_record};

use crate::error::{Error, Result};
use crate::queries::RecordQuery;
use crate::store::ArchiveStore;

/// Options for an archive transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferOptions {
    /// Unit system of the destination; the source's when unset.
    pub target_unit_system: Option<UnitSystem>,
    /// Perform the whole copy against an in-memory destination and leave
    /// the filesystem untouched.
    pub dry_run: bool,
    /// Records per read batch; 0 means the default.
    pub batch_records: u32,
    /// Emit a progress event every this many records; 0 means the default.
    pub progress_every: u64,
}

impl TransferOptions {
    /// Default records per read batch.
    pub const DEFAULT_BATCH_RECORDS: u32 = 2_000;
    /// Default progress interval, in records.
    pub const DEFAULT_PROGRESS_EVERY: u64 = 5_000;

    fn batch_records(&self) -> u32 {
        if self.batch_records == 0 {
            Self::DEFAULT_BATCH_RECORDS
        } else {
            self.batch_records
        }
    }

    fn progress_every(&self) -> u64 {
        if self.progress_every == 0 {
            Self::DEFAULT_PROGRESS_EVERY
        } else {
            self.progress_every
        }
    }
}

/// Outcome of an archive transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The source holds no records; the destination was created empty.
    NothingToTransfer {
        /// Wall-clock duration of the run.
        elapsed: Duration,
    },
    /// Every source record is visible in the destination.
    Transferred {
        /// Records copied.
        records: u64,
        /// Wall-clock duration of the run.
        elapsed: Duration,
    },
}

impl ArchiveStore {
    /// Copy every archive record into a freshly created destination store.
    pub fn transfer_to<P: AsRef<Path>>(
        &self,
        dest_path: P,
        opts: &TransferOptions,
    ) -> Result<TransferOutcome> {
        let started = Instant::now();

        let source_system = self.unit_system()?;
        let conversion = match opts.target_unit_system {
            None => None,
            Some(target) => match source_system {
                None => {
                    return Err(Error::SchemaMismatch(
                        "source unit system is unknown; conversion parameters cannot be resolved"
                            .to_string(),
                    ));
                }
                Some(source) if source == target => None,
                Some(source) => Some((source, target)),
            },
        };
        let dest_system = opts.target_unit_system.or(source_system);

        let dest = if opts.dry_run {
            ArchiveStore::create_in_memory(self.schema().clone(), dest_system)?
        } else {
            ArchiveStore::create(dest_path.as_ref(), self.schema().clone(), dest_system)?
        };

        let batch = opts.batch_records();
        let progress_every = opts.progress_every();
        let mut copied = 0u64;
        let mut last_ts: Option<i64> = None;

        let tx = dest.begin()?;
        {
            let mut stmt = tx.prepare(&dest.insert_sql())?;
            loop {
                let mut query = RecordQuery::new().oldest_first().limit(batch);
                if let Some(last) = last_ts {
                    query = query.since(last + 1);
                }
                let records = self.records(&query)?;
                if records.is_empty() {
                    break;
                }

                for record in &records {
                    let outgoing = match conversion {
                        Some((from, to)) => convert_record(record, from, to),
                        None => record.clone(),
                    };
                    stmt.execute(rusqlite::params_from_iter(dest.insert_params(&outgoing)))?;

                    copied += 1;
                    if copied % progress_every == 0 {
                        info!(copied, "transfer progress");
                    }
                }
                last_ts = records.last().map(|r| r.timestamp);
            }
        }
        if opts.dry_run {
            tx.rollback()?;
        } else {
            tx.commit()?;
        }

        let elapsed = started.elapsed();
        if copied == 0 {
            debug!("source archive holds no records");
            return Ok(TransferOutcome::NothingToTransfer { elapsed });
        }

        info!(
            records = copied,
            converted = conversion.is_some(),
            dry_run = opts.dry_run,
            ?elapsed,
            "archive transfer finished"
        );
        Ok(TransferOutcome::Transferred {
            records: copied,
            elapsed,
        })
    }

    /// Copy this archive into a sibling store derived from its own path,
    /// converting to the target unit system.
    ///
    /// The destination is `<stem>_new.<ext>` next to the source. Requires
    /// a file-backed, unit-initialized source.
    pub fn reconfigure(
        &self,
        target_unit_system: UnitSystem,
        dry_run: bool,
    ) -> Result<(PathBuf, TransferOutcome)> {
        if self.is_in_memory() {
            return Err(Error::InvalidPath(
                "an in-memory store has no sibling path to reconfigure into".to_string(),
            ));
        }
        if self.unit_system()?.is_none() {
            return Err(Error::NotInitialized(
                "source unit system is not established".to_string(),
            ));
        }

        let dest_path = sibling_path(self.path());
        let outcome = self.transfer_to(
            &dest_path,
            &TransferOptions {
                target_unit_system: Some(target_unit_system),
                dry_run,
                ..Default::default()
            },
        )?;
        Ok((dest_path, outcome))
    }
}

/// `<stem>_new.<ext>` next to `path`.
fn sibling_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}_new.{}", stem, ext.to_string_lossy()),
        None => format!("{}_new", stem),
    };
    path.with_file_name(name)
}
