//! Query builder for readings.
//!
//! # Example
//!
//! ```
//! use airwatch_store::{ReadingQuery, Store};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! let query = ReadingQuery::new()
//!     .city("Lahore")
//!     .since(yesterday)
//!     .limit(50)
//!     .oldest_first();
//!
//! let readings = store.query_readings(&query)?;
//! assert!(readings.is_empty());
//! # Ok::<(), airwatch_store::Error>(())
//! ```

use time::OffsetDateTime;

/// Fluent query builder for stored readings.
///
/// By default, results are ordered by `captured_at` descending (newest
/// first). Time bounds are inclusive.
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    /// Filter by city name (case-insensitive).
    pub city: Option<String>,
    /// Readings captured at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Readings captured at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by captured_at descending.
    pub newest_first: bool,
}

impl ReadingQuery {
    /// Create a new query: all cities, no time bounds, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter by city.
    pub fn city(mut self, city: &str) -> Self {
        self.city = Some(city.to_string());
        self
    }

    /// Readings captured at or after `time`.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Readings captured at or before `time`.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
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

    /// Chronological order.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref city) = self.city {
            conditions.push("c.name = ?");
            params.push(Box::new(city.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("r.captured_at >= ?");
            params.push(Box::new(since.unix_timestamp()));
        }

        if let Some(until) = self.until {
            conditions.push("r.captured_at <= ?");
            params.push(Box::new(until.unix_timestamp()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT r.id, c.name, r.captured_at, r.aqi, r.pm25, r.pm10, r.co, r.no2, \
             r.o3, r.so2, r.nh3 \
             FROM readings r JOIN cities c ON c.id = r.city_id {} \
             ORDER BY r.captured_at {order}, r.id {order}",
            where_clause
        );

        // SQLite only accepts OFFSET after a LIMIT.
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }
}
