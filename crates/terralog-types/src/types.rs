//! Core types for Terralog observation archives.

use core::fmt;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Declared storage type of an archive column.
///
/// Every observation column carries one of these in the archive schema.
/// The integrity scanner compares the runtime type of each stored value
/// against the declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ColumnType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Real,
    /// UTF-8 text.
    Text,
}

impl ColumnType {
    /// Parse a column type from its lowercase name.
    ///
    /// # Examples
    ///
    /// ```
    /// use terralog_types::ColumnType;
    ///
    /// assert_eq!(ColumnType::from_name("real"), Ok(ColumnType::Real));
    /// assert!(ColumnType::from_name("blob").is_err());
    /// ```
    pub fn from_name(name: &str) -> Result<Self, TypeError> {
        match name {
            "integer" => Ok(ColumnType::Integer),
            "real" => Ok(ColumnType::Real),
            "text" => Ok(ColumnType::Text),
            other => Err(TypeError::UnknownColumnType(other.to_string())),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Real => write!(f, "real"),
            ColumnType::Text => write!(f, "text"),
        }
    }
}

/// A runtime value stored in an archive column.
///
/// The archive preserves the runtime type of every stored value, so a
/// misbehaving writer can leave, say, text in a column declared `Real`.
/// [`Value::conforms_to`] detects that and [`Value::coerce_to`] applies
/// the repair table used by the integrity scanner.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    /// Absent value.
    Null,
    /// Integer value.
    Integer(i64),
    /// Float value.
    Real(f64),
    /// Text value.
    Text(String),
}

impl Value {
    /// Numeric view of the value, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view of the value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Runtime type of the value; `None` for null, which has no type.
    pub fn runtime_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Real(_) => Some(ColumnType::Real),
            Value::Text(_) => Some(ColumnType::Text),
        }
    }

    /// Whether this value is well-typed for a column declared as `declared`.
    ///
    /// Null conforms to every column type.
    pub fn conforms_to(&self, declared: ColumnType) -> bool {
        match self.runtime_type() {
            None => true,
            Some(actual) => actual == declared,
        }
    }

    /// Coerce the value to the declared column type.
    ///
    /// The repair table, per target type:
    ///
    /// - `Integer`: text parses via `i64`; a float converts only when it is
    ///   exactly integral; everything else becomes null.
    /// - `Real`: text parses via `f64`; an integer widens losslessly;
    ///   everything else becomes null.
    /// - `Text`: numbers render via `Display`; everything else becomes null.
    ///
    /// Null is the failure sentinel: a value that cannot be represented in
    /// the declared type is dropped rather than guessed at.
    ///
    /// # Examples
    ///
    /// ```
    /// use terralog_types::{ColumnType, Value};
    ///
    /// assert_eq!(Value::Text("5".into()).coerce_to(ColumnType::Integer), Value::Integer(5));
    /// assert_eq!(Value::Text("n/a".into()).coerce_to(ColumnType::Real), Value::Null);
    /// ```
    pub fn coerce_to(&self, declared: ColumnType) -> Value {
        match declared {
            ColumnType::Integer => match self {
                Value::Integer(v) => Value::Integer(*v),
                Value::Text(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .unwrap_or(Value::Null),
                Value::Real(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Value::Integer(*f as i64)
                }
                _ => Value::Null,
            },
            ColumnType::Real => match self {
                Value::Real(v) => Value::Real(*v),
                Value::Integer(v) => Value::Real(*v as f64),
                Value::Text(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Real)
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            },
            ColumnType::Text => match self {
                Value::Text(s) => Value::Text(s.clone()),
                Value::Integer(v) => Value::Text(v.to_string()),
                Value::Real(v) => Value::Text(v.to_string()),
                _ => Value::Null,
            },
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Name of the engine-managed key column present in every archive schema.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// A single column in the archive schema.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Declared storage type.
    pub column_type: ColumnType,
}

impl Column {
    /// Create a column definition.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Ordered archive schema: the declared column list of an archive store.
///
/// The first column is always [`TIMESTAMP_COLUMN`] (integer, unique key);
/// it is managed by the engine and excluded from type scans. The schema is
/// configuration data: it is persisted with the store at creation and
/// loaded back on open, never inferred from stored values.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArchiveSchema {
    columns: Vec<Column>,
}

impl ArchiveSchema {
    /// Build a schema from observation columns.
    ///
    /// The timestamp key column is prepended automatically if absent.
    pub fn new(columns: Vec<Column>) -> Self {
        let mut all = Vec::with_capacity(columns.len() + 1);
        if columns.first().map(|c| c.name.as_str()) != Some(TIMESTAMP_COLUMN) {
            all.push(Column::new(TIMESTAMP_COLUMN, ColumnType::Integer));
        }
        all.extend(columns);
        Self { columns: all }
    }

    /// All columns in declared order, timestamp first.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Observation columns: everything except the timestamp key.
    pub fn observations(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().skip(1)
    }

    /// Declared type of a column, if the column exists.
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.column_type)
    }

    /// Whether the schema declares a column with this name.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// The stock schema of the Terralog data logger.
///
/// Deployments with extra sensors pass their own column list to
/// [`ArchiveSchema::new`]; this is the default used when none is given.
pub fn default_schema() -> ArchiveSchema {
    ArchiveSchema::new(vec![
        Column::new("temperature", ColumnType::Real),
        Column::new("pressure", ColumnType::Real),
        Column::new("humidity", ColumnType::Real),
        Column::new("wind_speed", ColumnType::Real),
        Column::new("rain", ColumnType::Real),
        Column::new("co2", ColumnType::Integer),
    ])
}

/// One observation record: a timestamp plus named values.
///
/// Records are created by the logger and treated as append-only by the
/// maintenance engine; only the integrity scanner rewrites individual
/// column values, keyed by `(timestamp, column)`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArchiveRecord {
    /// Unix timestamp in seconds; the archive's unique key.
    pub timestamp: i64,
    /// Observation values by column name. Absent columns read as null.
    pub values: BTreeMap<String, Value>,
}

impl ArchiveRecord {
    /// Create an empty record at a timestamp.
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    /// Set an observation value, builder style.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Get an observation value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}
