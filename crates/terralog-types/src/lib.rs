//! Platform-agnostic types for Terralog observation archives.
//!
//! This crate provides the shared vocabulary of the Terralog data logger:
//! runtime values, declared column types, the archive schema, observation
//! records, and unit systems with their conversion tables.
//!
//! # Example
//!
//! ```
//! use terralog_types::{ArchiveRecord, UnitSystem, convert_record};
//!
//! let record = ArchiveRecord::new(1_700_000_000).with_value("temperature", 100.0);
//! let metric = convert_record(&record, UnitSystem::Us, UnitSystem::Metric);
//! assert!((metric.get("temperature").unwrap().as_f64().unwrap() - 37.78).abs() < 0.01);
//! ```

pub mod error;
pub mod types;
pub mod units;

pub use error::{TypeError, TypeResult};
pub use types::{
    ArchiveRecord, ArchiveSchema, Column, ColumnType, TIMESTAMP_COLUMN, Value, default_schema,
};
pub use units::{UnitGroup, UnitSystem, convert, convert_record, unit_group_for, unit_label};
