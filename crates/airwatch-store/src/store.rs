//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info};

use airwatch_types::{
    AlertClaim, Category, DEFAULT_ALERT_THRESHOLD, DEFAULT_MIN_INTERVAL_HOURS, Reading, SentAlert,
    Subscription, ValidationError,
};

use crate::error::{Error, Result};
use crate::models::{CityRanking, StoredCity, StoredReading, SubscribeOutcome};
use crate::queries::ReadingQuery;
use crate::schema;

const CITY_COLUMNS: &str = "id, name, country, latitude, longitude, active, created_at";

const SUBSCRIPTION_SELECT: &str = "SELECT s.id, s.email, c.name, s.threshold, \
     s.min_interval_hours, s.last_alert_at, s.active, s.created_at \
     FROM subscriptions s JOIN cities c ON c.id = s.city_id";

/// SQLite-based store for cities, readings and subscriptions.
pub struct Store {
    conn: Connection,
    default_threshold: f64,
    default_min_interval_hours: f64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self::from_connection(conn))
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            default_threshold: DEFAULT_ALERT_THRESHOLD,
            default_min_interval_hours: DEFAULT_MIN_INTERVAL_HOURS,
        }
    }

    /// Threshold and interval given to new subscriptions that omit them.
    #[must_use]
    pub fn with_subscription_defaults(mut self, threshold: f64, min_interval_hours: f64) -> Self {
        self.default_threshold = threshold;
        self.default_min_interval_hours = min_interval_hours;
        self
    }
}

fn from_unix(secs: i64) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Integer, Box::new(e))
    })
}

fn city_from_row(row: &Row<'_>) -> rusqlite::Result<StoredCity> {
    Ok(StoredCity {
        id: row.get(0)?,
        name: row.get(1)?,
        country: row.get(2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        active: row.get(5)?,
        created_at: from_unix(row.get(6)?)?,
    })
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get(0)?,
        email: row.get(1)?,
        city: row.get(2)?,
        threshold: row.get(3)?,
        min_interval_hours: row.get(4)?,
        last_alert_at: row.get::<_, Option<i64>>(5)?.map(from_unix).transpose()?,
        active: row.get(6)?,
        created_at: from_unix(row.get(7)?)?,
    })
}

fn normalize_city(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidCity(name.to_string()));
    }
    Ok(trimmed)
}

fn validate_email(email: &str) -> Result<&str> {
    let trimmed = email.trim();
    let well_formed = trimmed
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
        && !trimmed.contains(char::is_whitespace);
    if !well_formed {
        return Err(ValidationError::InvalidSubscription(format!(
            "invalid email address: {:?}",
            email
        ))
        .into());
    }
    Ok(trimmed)
}

// City operations
impl Store {
    /// Get or create a city, filling in any metadata that is provided.
    pub fn upsert_city(
        &self,
        name: &str,
        country: Option<&str>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<StoredCity> {
        let name = normalize_city(name)?;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        self.conn.execute(
            "INSERT INTO cities (name, country, latitude, longitude, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                country = COALESCE(?2, country),
                latitude = COALESCE(?3, latitude),
                longitude = COALESCE(?4, longitude)",
            rusqlite::params![name, country, latitude, longitude, now],
        )?;

        self.get_city(name)?
            .ok_or_else(|| Error::CityNotFound(name.to_string()))
    }

    /// Get a city by name (case-insensitive).
    pub fn get_city(&self, name: &str) -> Result<Option<StoredCity>> {
        let sql = format!("SELECT {} FROM cities WHERE name = ?", CITY_COLUMNS);
        let city = self
            .conn
            .query_row(&sql, [name.trim()], city_from_row)
            .optional()?;
        Ok(city)
    }

    /// List all cities by name.
    pub fn list_cities(&self) -> Result<Vec<StoredCity>> {
        let sql = format!("SELECT {} FROM cities ORDER BY name", CITY_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let cities = stmt
            .query_map([], city_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cities)
    }

    /// Show or hide a city in rankings.
    pub fn set_city_active(&self, name: &str, active: bool) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE cities SET active = ?2 WHERE name = ?1",
            rusqlite::params![name.trim(), active],
        )?;
        if updated == 0 {
            return Err(Error::CityNotFound(name.to_string()));
        }
        Ok(())
    }

    fn ensure_city(&self, name: &str) -> Result<i64> {
        Ok(self.upsert_city(name, None, None, None)?.id)
    }
}

// Reading operations
impl Store {
    /// Insert a reading, creating the city if needed.
    ///
    /// Timestamps are stored with second precision.
    pub fn insert_reading(&self, city: &str, reading: &Reading) -> Result<i64> {
        reading.validate()?;
        let city_id = self.ensure_city(city)?;

        self.conn.execute(
            "INSERT INTO readings (city_id, captured_at, aqi, pm25, pm10, co, no2, o3, so2, nh3)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                city_id,
                reading.timestamp.unix_timestamp(),
                reading.aqi,
                reading.pm25,
                reading.pm10,
                reading.co,
                reading.no2,
                reading.o3,
                reading.so2,
                reading.nh3,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Stored reading {} for {} (AQI {})", id, city, reading.aqi);
        Ok(id)
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let readings = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok(StoredReading {
                    id: row.get(0)?,
                    city: row.get(1)?,
                    captured_at: from_unix(row.get(2)?)?,
                    aqi: row.get(3)?,
                    pm25: row.get(4)?,
                    pm10: row.get(5)?,
                    co: row.get(6)?,
                    no2: row.get(7)?,
                    o3: row.get(8)?,
                    so2: row.get(9)?,
                    nh3: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Latest reading for a city.
    pub fn latest_reading(&self, city: &str) -> Result<Option<StoredReading>> {
        let query = ReadingQuery::new().city(city).limit(1);
        let mut readings = self.query_readings(&query)?;
        Ok(readings.pop())
    }

    /// Count readings, optionally for one city.
    pub fn count_readings(&self, city: Option<&str>) -> Result<u64> {
        let count: i64 = match city {
            Some(name) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings r JOIN cities c ON c.id = r.city_id
                 WHERE c.name = ?",
                [name],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// Active cities ranked by their latest AQI, highest first.
    pub fn top_cities(&self, limit: u32) -> Result<Vec<CityRanking>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.name, c.country, r.aqi, r.captured_at
             FROM cities c
             JOIN readings r ON r.id = (
                 SELECT r2.id FROM readings r2 WHERE r2.city_id = c.id
                 ORDER BY r2.captured_at DESC, r2.id DESC LIMIT 1
             )
             WHERE c.active = 1
             ORDER BY r.aqi DESC, c.name ASC
             LIMIT ?1",
        )?;

        let ranking = stmt
            .query_map([limit], |row| {
                Ok(CityRanking {
                    city: row.get(0)?,
                    country: row.get(1)?,
                    aqi: row.get(2)?,
                    captured_at: from_unix(row.get(3)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ranking)
    }
}

// Subscription operations
impl Store {
    /// Subscribe `email` to alerts for `city`.
    ///
    /// Creates the subscription, or reactivates an existing one for the same
    /// (email, city) pair. Provided threshold and interval replace the stored
    /// ones; omitted values keep the stored values, or take the store's
    /// defaults for a new subscription.
    pub fn subscribe(
        &self,
        email: &str,
        city: &str,
        threshold: Option<f64>,
        min_interval_hours: Option<f64>,
    ) -> Result<SubscribeOutcome> {
        let email = validate_email(email)?;
        let city_name = normalize_city(city)?;

        // Validate the supplied values before touching the database.
        Subscription::new(email, city_name)
            .with_threshold(threshold.unwrap_or(self.default_threshold))
            .with_min_interval_hours(min_interval_hours.unwrap_or(self.default_min_interval_hours))
            .validate()?;

        let city_id = self.ensure_city(city_name)?;
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM subscriptions WHERE email = ?1 AND city_id = ?2",
                rusqlite::params![email, city_id],
                |row| row.get(0),
            )
            .optional()?;

        let (id, created) = match existing {
            Some(id) => {
                self.conn.execute(
                    "UPDATE subscriptions SET
                        active = 1,
                        threshold = COALESCE(?2, threshold),
                        min_interval_hours = COALESCE(?3, min_interval_hours)
                     WHERE id = ?1",
                    rusqlite::params![id, threshold, min_interval_hours],
                )?;
                info!("Reactivated subscription {} ({} / {})", id, email, city_name);
                (id, false)
            }
            None => {
                self.conn.execute(
                    "INSERT INTO subscriptions
                        (email, city_id, threshold, min_interval_hours, active, created_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                    rusqlite::params![
                        email,
                        city_id,
                        threshold.unwrap_or(self.default_threshold),
                        min_interval_hours.unwrap_or(self.default_min_interval_hours),
                        OffsetDateTime::now_utc().unix_timestamp(),
                    ],
                )?;
                let id = self.conn.last_insert_rowid();
                info!("Created subscription {} ({} / {})", id, email, city_name);
                (id, true)
            }
        };

        let subscription = self
            .get_subscription(id)?
            .ok_or(Error::SubscriptionNotFound(id))?;
        Ok(SubscribeOutcome {
            subscription,
            created,
        })
    }

    /// Deactivate the subscription of `email` for `city`.
    ///
    /// Returns `false` if there was no active subscription.
    pub fn unsubscribe(&self, email: &str, city: &str) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE subscriptions SET active = 0
             WHERE email = ?1 AND active = 1
               AND city_id = (SELECT id FROM cities WHERE name = ?2)",
            rusqlite::params![email.trim(), city.trim()],
        )?;
        if updated > 0 {
            info!("Unsubscribed {} from {}", email, city);
        }
        Ok(updated > 0)
    }

    /// A subscription by id, active or not.
    pub fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let sql = format!("{} WHERE s.id = ?", SUBSCRIPTION_SELECT);
        let sub = self
            .conn
            .query_row(&sql, [id], subscription_from_row)
            .optional()?;
        Ok(sub)
    }

    /// Active subscriptions of an email address, by city name.
    pub fn list_subscriptions_by_email(&self, email: &str) -> Result<Vec<Subscription>> {
        let sql = format!(
            "{} WHERE s.email = ? AND s.active = 1 ORDER BY c.name",
            SUBSCRIPTION_SELECT
        );
        self.query_subscriptions(&sql, email.trim())
    }

    /// Active subscriptions for a city, oldest first.
    pub fn active_subscriptions(&self, city: &str) -> Result<Vec<Subscription>> {
        let sql = format!(
            "{} WHERE c.name = ? AND s.active = 1 ORDER BY s.id",
            SUBSCRIPTION_SELECT
        );
        self.query_subscriptions(&sql, city.trim())
    }

    fn query_subscriptions(&self, sql: &str, param: &str) -> Result<Vec<Subscription>> {
        let mut stmt = self.conn.prepare(sql)?;
        let subs = stmt
            .query_map([param], subscription_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(subs)
    }

    /// Change threshold and/or interval of a subscription.
    pub fn update_subscription(
        &self,
        id: i64,
        threshold: Option<f64>,
        min_interval_hours: Option<f64>,
    ) -> Result<Subscription> {
        let mut sub = self
            .get_subscription(id)?
            .ok_or(Error::SubscriptionNotFound(id))?;
        if let Some(threshold) = threshold {
            sub.threshold = threshold;
        }
        if let Some(hours) = min_interval_hours {
            sub.min_interval_hours = hours;
        }
        sub.validate()?;

        self.conn.execute(
            "UPDATE subscriptions SET threshold = ?2, min_interval_hours = ?3 WHERE id = ?1",
            rusqlite::params![id, sub.threshold, sub.min_interval_hours],
        )?;
        Ok(sub)
    }

    /// Names of cities with at least one active subscription.
    pub fn cities_with_active_subscriptions(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT c.name FROM subscriptions s JOIN cities c ON c.id = s.city_id
             WHERE s.active = 1 ORDER BY c.name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Number of active subscriptions.
    pub fn count_active_subscriptions(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM subscriptions WHERE active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Claim the next alert of a subscription before delivering it.
    ///
    /// Succeeds only if `last_alert_at` still equals `expected` and no other
    /// claim is held, or the held one was taken before `stale_before`.
    pub fn claim_alert(
        &self,
        id: i64,
        expected: Option<OffsetDateTime>,
        claimed_at: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> Result<AlertClaim> {
        let updated = self.conn.execute(
            "UPDATE subscriptions SET alert_claimed_at = ?3
             WHERE id = ?1
               AND last_alert_at IS ?2
               AND (alert_claimed_at IS NULL OR alert_claimed_at < ?4)",
            rusqlite::params![
                id,
                expected.map(|t| t.unix_timestamp()),
                claimed_at.unix_timestamp(),
                stale_before.unix_timestamp()
            ],
        )?;
        if updated > 0 {
            return Ok(AlertClaim::Acquired);
        }

        let current: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT last_alert_at FROM subscriptions WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        match current {
            None => Err(Error::SubscriptionNotFound(id)),
            Some(last) if last != expected.map(|t| t.unix_timestamp()) => {
                debug!("Claim on subscription {} lost: last_alert_at changed", id);
                Ok(AlertClaim::Changed)
            }
            Some(_) => {
                debug!("Claim on subscription {} lost: delivery in flight", id);
                Ok(AlertClaim::InFlight)
            }
        }
    }

    /// Drop a claim taken at `claimed_at`, if it is still the one held.
    pub fn release_alert_claim(&self, id: i64, claimed_at: OffsetDateTime) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE subscriptions SET alert_claimed_at = NULL
             WHERE id = ?1 AND alert_claimed_at = ?2",
            rusqlite::params![id, claimed_at.unix_timestamp()],
        )?;
        Ok(updated > 0)
    }

    /// Set `last_alert_at` to `new` only if it still equals `expected`, and
    /// clear any alert claim.
    ///
    /// Comparison happens at second precision, the resolution the column is
    /// stored at. An update that would move the stored instant backwards is
    /// refused. Returns `Ok(false)` when the update did not apply.
    pub fn compare_and_set_last_alert(
        &self,
        id: i64,
        expected: Option<OffsetDateTime>,
        new: OffsetDateTime,
    ) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE subscriptions SET last_alert_at = ?3, alert_claimed_at = NULL
             WHERE id = ?1
               AND last_alert_at IS ?2
               AND (last_alert_at IS NULL OR last_alert_at <= ?3)",
            rusqlite::params![
                id,
                expected.map(|t| t.unix_timestamp()),
                new.unix_timestamp()
            ],
        )?;

        if updated == 0 {
            if self.get_subscription(id)?.is_none() {
                return Err(Error::SubscriptionNotFound(id));
            }
            debug!("Compare-and-set on subscription {} lost", id);
            return Ok(false);
        }
        Ok(true)
    }
}

// Sent-alert log
impl Store {
    /// Append a delivered alert to the log.
    pub fn record_alert(&self, alert: &SentAlert) -> Result<i64> {
        let city_id = self.ensure_city(&alert.city)?;
        self.conn.execute(
            "INSERT INTO sent_alerts (subscription_id, city_id, email, aqi, category, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                alert.subscription_id,
                city_id,
                alert.email,
                alert.aqi,
                alert.category.severity_rank(),
                alert.sent_at.unix_timestamp(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Logged alerts, newest first, optionally for one city.
    pub fn list_alerts(&self, city: Option<&str>, limit: u32) -> Result<Vec<SentAlert>> {
        let mut sql = String::from(
            "SELECT a.id, a.subscription_id, c.name, a.email, a.aqi, a.category, a.sent_at
             FROM sent_alerts a JOIN cities c ON c.id = a.city_id",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(name) = city {
            sql.push_str(" WHERE c.name = ?");
            params.push(Box::new(name.trim().to_string()));
        }
        sql.push_str(&format!(" ORDER BY a.sent_at DESC, a.id DESC LIMIT {}", limit));

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let alerts = stmt
            .query_map(params_ref.as_slice(), |row| {
                let rank: u8 = row.get(5)?;
                let category = Category::from_rank(rank).ok_or_else(|| {
                    rusqlite::Error::IntegralValueOutOfRange(5, i64::from(rank))
                })?;
                Ok(SentAlert {
                    id: row.get(0)?,
                    subscription_id: row.get(1)?,
                    city: row.get(2)?,
                    email: row.get(3)?,
                    aqi: row.get(4)?,
                    category,
                    sent_at: from_unix(row.get(6)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn at(hours: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap() + Duration::hours(hours)
    }

    fn reading(aqi: f64, hours: i64) -> Reading {
        Reading::builder().aqi(aqi).pm25(aqi / 4.0).timestamp(at(hours)).build()
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");

        let store = Store::open(&path).unwrap();
        store.insert_reading("Lahore", &reading(80.0, 0)).unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.count_readings(None).unwrap(), 1);
    }

    #[test]
    fn test_upsert_city_merges_metadata() {
        let store = Store::open_in_memory().unwrap();
        let first = store
            .upsert_city("Lahore", Some("PK"), Some(31.5), Some(74.3))
            .unwrap();
        let second = store.upsert_city("lahore", None, None, None).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Lahore");
        assert_eq!(second.country.as_deref(), Some("PK"));
        assert_eq!(second.latitude, Some(31.5));
        assert_eq!(store.list_cities().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_city_name_rejected() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.upsert_city("   ", None, None, None),
            Err(Error::InvalidCity(_))
        ));
    }

    #[test]
    fn test_insert_and_query_readings() {
        let store = Store::open_in_memory().unwrap();
        for (i, aqi) in [40.0, 120.0, 75.0].into_iter().enumerate() {
            store.insert_reading("Lahore", &reading(aqi, i as i64)).unwrap();
        }
        store.insert_reading("Karachi", &reading(60.0, 1)).unwrap();

        let all = store.query_readings(&ReadingQuery::new().city("Lahore")).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].aqi, 75.0);

        let window = store
            .query_readings(
                &ReadingQuery::new()
                    .city("lahore")
                    .since(at(1))
                    .until(at(2))
                    .oldest_first(),
            )
            .unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].aqi, 120.0);
        assert_eq!(window[0].to_reading().timestamp, at(1));

        let latest = store.latest_reading("Lahore").unwrap().unwrap();
        assert_eq!(latest.aqi, 75.0);
        assert_eq!(store.count_readings(Some("Karachi")).unwrap(), 1);
        assert_eq!(store.count_readings(None).unwrap(), 4);
    }

    #[test]
    fn test_invalid_reading_rejected() {
        let store = Store::open_in_memory().unwrap();
        let bad = Reading::builder().aqi(-1.0).build();
        assert!(matches!(
            store.insert_reading("Lahore", &bad),
            Err(Error::Validation(_))
        ));
        assert!(store.list_cities().unwrap().is_empty());
    }

    #[test]
    fn test_top_cities_uses_latest_reading() {
        let store = Store::open_in_memory().unwrap();
        store.insert_reading("Lahore", &reading(300.0, 0)).unwrap();
        store.insert_reading("Lahore", &reading(90.0, 1)).unwrap();
        store.insert_reading("Delhi", &reading(180.0, 0)).unwrap();
        store.insert_reading("Oslo", &reading(20.0, 0)).unwrap();

        let top = store.top_cities(10).unwrap();
        let names: Vec<&str> = top.iter().map(|r| r.city.as_str()).collect();
        assert_eq!(names, vec!["Delhi", "Lahore", "Oslo"]);
        assert_eq!(top[1].aqi, 90.0);

        assert_eq!(store.top_cities(1).unwrap().len(), 1);

        store.set_city_active("Delhi", false).unwrap();
        assert_eq!(store.top_cities(10).unwrap()[0].city, "Lahore");
    }

    #[test]
    fn test_subscribe_creates_then_reactivates() {
        let store = Store::open_in_memory().unwrap();

        let first = store.subscribe("a@example.com", "Lahore", None, None).unwrap();
        assert!(first.created);
        assert_eq!(first.subscription.threshold, DEFAULT_ALERT_THRESHOLD);
        assert_eq!(first.subscription.min_interval_hours, DEFAULT_MIN_INTERVAL_HOURS);
        assert!(first.subscription.active);
        assert_eq!(first.subscription.last_alert_at, None);

        assert!(store.unsubscribe("a@example.com", "Lahore").unwrap());
        assert!(!store.unsubscribe("a@example.com", "Lahore").unwrap());
        assert!(store.active_subscriptions("Lahore").unwrap().is_empty());

        let again = store
            .subscribe("a@example.com", "lahore", Some(100.0), None)
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.subscription.id, first.subscription.id);
        assert_eq!(again.subscription.threshold, 100.0);
        assert!(again.subscription.active);
    }

    #[test]
    fn test_custom_subscription_defaults() {
        let store = Store::open_in_memory()
            .unwrap()
            .with_subscription_defaults(100.0, 6.0);
        let sub = store
            .subscribe("a@example.com", "Lahore", None, None)
            .unwrap()
            .subscription;
        assert_eq!(sub.threshold, 100.0);
        assert_eq!(sub.min_interval_hours, 6.0);
    }

    #[test]
    fn test_subscribe_validation() {
        let store = Store::open_in_memory().unwrap();
        for email in ["", "no-at-sign", "@example.com", "a@localhost", "a b@example.com"] {
            assert!(
                store.subscribe(email, "Lahore", None, None).is_err(),
                "{:?} accepted",
                email
            );
        }
        assert!(matches!(
            store.subscribe("a@example.com", "Lahore", Some(-5.0), None),
            Err(Error::Validation(ValidationError::InvalidSubscription(_)))
        ));
        assert!(store.subscribe("a@example.com", "Lahore", None, Some(f64::NAN)).is_err());
        assert!(store.list_cities().unwrap().is_empty());
    }

    #[test]
    fn test_list_by_email_and_update() {
        let store = Store::open_in_memory().unwrap();
        let lahore = store.subscribe("a@example.com", "Lahore", None, None).unwrap();
        store.subscribe("a@example.com", "Delhi", None, None).unwrap();
        store.subscribe("b@example.com", "Delhi", None, None).unwrap();

        let subs = store.list_subscriptions_by_email("a@example.com").unwrap();
        let cities: Vec<&str> = subs.iter().map(|s| s.city.as_str()).collect();
        assert_eq!(cities, vec!["Delhi", "Lahore"]);

        let id = lahore.subscription.id;
        let updated = store.update_subscription(id, Some(180.0), Some(6.0)).unwrap();
        assert_eq!(updated.threshold, 180.0);
        assert_eq!(updated.min_interval_hours, 6.0);
        assert_eq!(store.get_subscription(id).unwrap().unwrap(), updated);

        assert!(store.update_subscription(id, None, Some(-1.0)).is_err());
        assert!(matches!(
            store.update_subscription(999, Some(10.0), None),
            Err(Error::SubscriptionNotFound(999))
        ));

        assert_eq!(
            store.cities_with_active_subscriptions().unwrap(),
            vec!["Delhi".to_string(), "Lahore".to_string()]
        );
        assert_eq!(store.count_active_subscriptions().unwrap(), 3);
    }

    #[test]
    fn test_compare_and_set_last_alert() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .subscribe("a@example.com", "Lahore", None, None)
            .unwrap()
            .subscription
            .id;

        assert!(store.compare_and_set_last_alert(id, None, at(0)).unwrap());
        // A second writer that also read `None` loses.
        assert!(!store.compare_and_set_last_alert(id, None, at(1)).unwrap());

        let stored = store.get_subscription(id).unwrap().unwrap();
        assert_eq!(stored.last_alert_at, Some(at(0)));

        assert!(
            store
                .compare_and_set_last_alert(id, Some(at(0)), at(25))
                .unwrap()
        );
        assert_eq!(
            store.get_subscription(id).unwrap().unwrap().last_alert_at,
            Some(at(25))
        );
    }

    #[test]
    fn test_compare_and_set_is_monotonic() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .subscribe("a@example.com", "Lahore", None, None)
            .unwrap()
            .subscription
            .id;
        assert!(store.compare_and_set_last_alert(id, None, at(10)).unwrap());

        assert!(
            !store
                .compare_and_set_last_alert(id, Some(at(10)), at(9))
                .unwrap()
        );
        assert_eq!(
            store.get_subscription(id).unwrap().unwrap().last_alert_at,
            Some(at(10))
        );

        assert!(matches!(
            store.compare_and_set_last_alert(404, None, at(1)),
            Err(Error::SubscriptionNotFound(404))
        ));
    }

    #[test]
    fn test_compare_and_set_truncates_to_seconds() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .subscribe("a@example.com", "Lahore", None, None)
            .unwrap()
            .subscription
            .id;
        let precise = at(0) + Duration::milliseconds(750);

        assert!(store.compare_and_set_last_alert(id, None, precise).unwrap());
        let stored = store.get_subscription(id).unwrap().unwrap().last_alert_at;
        assert_eq!(stored, Some(at(0)));

        // The value read back is a valid expectation for the next update.
        assert!(store.compare_and_set_last_alert(id, stored, at(30)).unwrap());
    }

    #[test]
    fn test_claim_blocks_second_evaluator() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .subscribe("a@example.com", "Lahore", None, None)
            .unwrap()
            .subscription
            .id;
        let lease_start = at(0) - Duration::minutes(10);

        assert_eq!(
            store.claim_alert(id, None, at(0), lease_start).unwrap(),
            AlertClaim::Acquired
        );
        assert_eq!(
            store.claim_alert(id, None, at(0), lease_start).unwrap(),
            AlertClaim::InFlight
        );

        // Committing clears the claim; the old expectation is now stale.
        assert!(store.compare_and_set_last_alert(id, None, at(0)).unwrap());
        assert_eq!(
            store.claim_alert(id, None, at(1), at(1)).unwrap(),
            AlertClaim::Changed
        );
        assert_eq!(
            store.claim_alert(id, Some(at(0)), at(1), at(1)).unwrap(),
            AlertClaim::Acquired
        );
        assert!(matches!(
            store.claim_alert(404, None, at(0), at(0)),
            Err(Error::SubscriptionNotFound(404))
        ));
    }

    #[test]
    fn test_release_and_expired_claims() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .subscribe("a@example.com", "Lahore", None, None)
            .unwrap()
            .subscription
            .id;

        store.claim_alert(id, None, at(0), at(-1)).unwrap();
        assert!(!store.release_alert_claim(id, at(5)).unwrap());
        assert!(store.release_alert_claim(id, at(0)).unwrap());
        assert_eq!(
            store.claim_alert(id, None, at(1), at(0)).unwrap(),
            AlertClaim::Acquired
        );

        // A claim older than the lease can be taken over.
        assert_eq!(
            store.claim_alert(id, None, at(3), at(2)).unwrap(),
            AlertClaim::Acquired
        );
        assert!(!store.release_alert_claim(id, at(1)).unwrap());

        // Releasing never touches last_alert_at.
        assert_eq!(store.get_subscription(id).unwrap().unwrap().last_alert_at, None);
    }

    #[test]
    fn test_record_and_list_alerts() {
        let store = Store::open_in_memory().unwrap();
        let sub = store
            .subscribe("a@example.com", "Lahore", None, None)
            .unwrap()
            .subscription;

        for (hours, aqi, category) in [
            (0, 160.0, Category::Unhealthy),
            (30, 320.0, Category::Hazardous),
        ] {
            store
                .record_alert(&SentAlert {
                    id: 0,
                    subscription_id: sub.id,
                    city: "Lahore".into(),
                    email: sub.email.clone(),
                    aqi,
                    category,
                    sent_at: at(hours),
                })
                .unwrap();
        }

        let alerts = store.list_alerts(Some("Lahore"), 10).unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].category, Category::Hazardous);
        assert_eq!(alerts[0].sent_at, at(30));
        assert!(alerts[0].id > 0);

        assert_eq!(store.list_alerts(None, 1).unwrap().len(), 1);
        assert!(store.list_alerts(Some("Delhi"), 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_behind_async_mutex() {
        let store = std::sync::Arc::new(tokio::sync::Mutex::new(Store::open_in_memory().unwrap()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let guard = store.lock().await;
                guard.insert_reading("Lahore", &reading(50.0 + i as f64, i)).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.lock().await.count_readings(Some("Lahore")).unwrap(), 4);
    }
}
