//! Database schema and migrations.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        apply_v2(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Timestamps are unix seconds (UTC). City names compare case-insensitively.
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            country TEXT,
            latitude REAL,
            longitude REAL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            city_id INTEGER NOT NULL REFERENCES cities(id),
            captured_at INTEGER NOT NULL,
            aqi REAL NOT NULL,
            pm25 REAL NOT NULL,
            pm10 REAL NOT NULL,
            co REAL NOT NULL,
            no2 REAL NOT NULL,
            o3 REAL NOT NULL,
            so2 REAL NOT NULL,
            nh3 REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_readings_city_time
            ON readings(city_id, captured_at);

        CREATE TABLE IF NOT EXISTS subscriptions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL COLLATE NOCASE,
            city_id INTEGER NOT NULL REFERENCES cities(id),
            threshold REAL NOT NULL,
            min_interval_hours REAL NOT NULL,
            last_alert_at INTEGER,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            UNIQUE(email, city_id)
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_city
            ON subscriptions(city_id, active);

        CREATE TABLE IF NOT EXISTS sent_alerts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subscription_id INTEGER NOT NULL REFERENCES subscriptions(id),
            city_id INTEGER NOT NULL REFERENCES cities(id),
            email TEXT NOT NULL,
            aqi REAL NOT NULL,
            category INTEGER NOT NULL,
            sent_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sent_alerts_city_time
            ON sent_alerts(city_id, sent_at);
        "#,
    )?;

    Ok(())
}

/// v2: `alert_claimed_at` marks a subscription whose alert is being delivered.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch("ALTER TABLE subscriptions ADD COLUMN alert_claimed_at INTEGER;")?;
    Ok(())
}

fn migrate(conn: &Connection, old_version: i32) -> Result<()> {
    tracing::info!(
        "Migrating schema from version {} to {}",
        old_version,
        SCHEMA_VERSION
    );
    if old_version < 2 {
        apply_v2(conn)?;
    }
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}
