//! Query builder for archive records.
//!
//! [`RecordQuery`] follows the builder pattern for filtering and paginating
//! archive reads. The maintenance engine pages through large archives with
//! keyset pagination: ascending order, a `limit`, and `since(last_ts + 1)`
//! for the next batch, which stays linear where OFFSET paging would not.
//!
//! # Example
//!
//! ```
//! use terralog_store::{ArchiveStore, RecordQuery};
//! use terralog_types::default_schema;
//!
//! let store = ArchiveStore::create_in_memory(default_schema(), None)?;
//!
//! let query = RecordQuery::new()
//!     .since(1_700_000_000)
//!     .until(1_700_086_400)
//!     .oldest_first()
//!     .limit(1000);
//! let records = store.records(&query)?;
//! # Ok::<(), terralog_store::Error>(())
//! ```

use terralog_types::ArchiveSchema;

/// Fluent query builder for archive records.
///
/// All filter methods are optional and can be chained in any order. By
/// default, results are ordered by `timestamp` descending (newest first).
#[derive(Debug, Default, Clone)]
pub struct RecordQuery {
    /// Include only records at or after this timestamp.
    pub since: Option<i64>,
    /// Include only records at or before this timestamp.
    pub until: Option<i64>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by timestamp descending (newest first).
    pub newest_first: bool,
}

impl RecordQuery {
    /// Create a new query with default settings.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter to records at or after this timestamp.
    pub fn since(mut self, timestamp: i64) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Filter to records at or before this timestamp.
    pub fn until(mut self, timestamp: i64) -> Self {
        self.until = Some(timestamp);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results chronologically (ascending by timestamp).
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<i64>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(since) = self.since {
            conditions.push("\"timestamp\" >= ?");
            params.push(since);
        }

        if let Some(until) = self.until {
            conditions.push("\"timestamp\" <= ?");
            params.push(until);
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query over the given schema's columns.
    pub(crate) fn build_sql(&self, schema: &ArchiveSchema) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let columns = schema
            .columns()
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "SELECT {} FROM archive {} ORDER BY \"timestamp\" {}",
            columns, where_clause, order
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}
