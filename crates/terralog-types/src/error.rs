//! Error types for terralog-types.

/// Result type for parsing and conversion operations.
pub type TypeResult<T> = Result<T, TypeError>;

/// Errors raised when decoding stored tags and values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    /// A unit system tag not in the known set.
    #[error("unknown unit system tag: {0}")]
    UnknownUnitSystem(i64),

    /// A column type name not in the known set.
    #[error("unknown column type: {0}")]
    UnknownColumnType(String),

    /// A value that cannot be interpreted as requested.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
