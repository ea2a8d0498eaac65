//! Error types for terralog-store.

use std::path::PathBuf;

/// Result type for terralog-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in terralog-store.
///
/// Operational storage failures abort the transaction chunk they occur in
/// and propagate; chunks committed before the failure remain valid.
/// Coercion failures during an integrity scan and "no data" conditions are
/// not errors; they surface through reports and outcome enums instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operational error from the SQLite driver.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The store lacks required tables or metadata.
    #[error("store is not initialized: {0}")]
    NotInitialized(String),

    /// A create collided with an existing store. Never auto-resolved.
    #[error("store already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Destination schema or unit configuration cannot be resolved.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A column name not declared by the archive schema.
    #[error("unknown observation column: {0}")]
    UnknownColumn(String),

    /// A store path unusable for the requested operation.
    #[error("invalid store path: {0}")]
    InvalidPath(String),

    /// A metadata value that does not parse as its expected type.
    #[error("invalid metadata value for {key}: {value}")]
    InvalidMetadata { key: String, value: String },

    /// Cooperative cancellation between transaction chunks.
    #[error("operation interrupted between chunks")]
    Interrupted,

    /// Failed to create the database directory.
    #[error("failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Report serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
