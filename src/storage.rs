//! SQLite storage layer for Stormwatch.
//!
//! Holds the four persistent shapes the pipeline touches: users (read-only
//! here, owned by the auth layer), saved locations, alerts, and the
//! append-only weather history. The runner's only write-back is an alert's
//! `last_notified` timestamp, and that update is conditional so it can
//! never race a user disabling or deleting the alert.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::warn;

use crate::model::{
    ActiveAlert, Alert, AlertCondition, HistoryRecord, SavedLocation, SnapshotSource, Threshold,
    User, WeatherSnapshot, normalize_city,
};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g.
    ///   "sqlite:stormwatch.db?mode=rwc" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                label TEXT NOT NULL,
                city TEXT NOT NULL,
                latitude REAL,
                longitude REAL,
                created_at INTEGER NOT NULL,
                UNIQUE (user_id, city)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                location_id INTEGER NOT NULL,
                city TEXT NOT NULL,
                condition TEXT NOT NULL,
                threshold TEXT NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                last_notified INTEGER,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // The runner filters on is_enabled every cycle
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_enabled ON alerts(is_enabled)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_alerts_user_location ON alerts(user_id, location_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS weather_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                location_id INTEGER NOT NULL,
                city TEXT NOT NULL,
                logged_at INTEGER NOT NULL,
                provider_ts INTEGER NOT NULL,
                snapshot TEXT NOT NULL,
                source TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes for time-range queries per location and per city
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_location_ts
             ON weather_history(location_id, logged_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_city_ts
             ON weather_history(city, logged_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Cheap connectivity probe for health checks.
    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub async fn insert_user(&self, name: &str, email: &str) -> anyhow::Result<i64> {
        let result = sqlx::query("INSERT INTO users (name, email) VALUES (?, ?)")
            .bind(name)
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_user(&self, user_id: i64) -> anyhow::Result<Option<User>> {
        let row = sqlx::query("SELECT id, name, email FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| User {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
        }))
    }

    /// Delete a user without touching their alerts or locations.
    ///
    /// The auth layer owns user lifecycle; any alerts left dangling are
    /// skipped (with a warning) by [`Storage::load_active_alerts`].
    pub async fn delete_user(&self, user_id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Saved locations
    // ------------------------------------------------------------------

    /// Save a location for a user. The city key is normalized on the way
    /// in, and `(user_id, city)` is unique.
    pub async fn insert_location(
        &self,
        user_id: i64,
        label: &str,
        city: &str,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> anyhow::Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO locations (user_id, label, city, latitude, longitude, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(label)
        .bind(normalize_city(city))
        .bind(latitude)
        .bind(longitude)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_location(&self, location_id: i64) -> anyhow::Result<Option<SavedLocation>> {
        let row = sqlx::query(
            "SELECT id, user_id, label, city, latitude, longitude FROM locations WHERE id = ?",
        )
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| SavedLocation {
            id: row.get("id"),
            user_id: row.get("user_id"),
            label: row.get("label"),
            city: row.get("city"),
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
        }))
    }

    /// Delete a location and cascade to its alerts in one transaction.
    pub async fn delete_location(&self, location_id: i64) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM alerts WHERE location_id = ?")
            .bind(location_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM locations WHERE id = ?")
            .bind(location_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    /// Create an alert. The threshold kind must match what the condition
    /// compares against; that is fixed here, at creation time.
    pub async fn insert_alert(
        &self,
        user_id: i64,
        location_id: i64,
        condition: AlertCondition,
        threshold: Threshold,
    ) -> anyhow::Result<i64> {
        anyhow::ensure!(
            condition.accepts(&threshold),
            "condition {} expects a {} threshold",
            condition,
            condition.threshold_kind().as_str()
        );

        let location = self
            .get_location(location_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("location {location_id} does not exist"))?;

        let result = sqlx::query(
            r#"
            INSERT INTO alerts (user_id, location_id, city, condition, threshold, is_enabled, created_at)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(user_id)
        .bind(location_id)
        .bind(&location.city)
        .bind(condition.as_str())
        .bind(serde_json::to_string(&threshold)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_alert(&self, alert_id: i64) -> anyhow::Result<Option<Alert>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, location_id, city, condition, threshold, is_enabled, last_notified
            FROM alerts WHERE id = ?
            "#,
        )
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row_to_alert(&row)).transpose()
    }

    pub async fn set_alert_enabled(&self, alert_id: i64, enabled: bool) -> anyhow::Result<()> {
        sqlx::query("UPDATE alerts SET is_enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_alert(&self, alert_id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM alerts WHERE id = ?")
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load every enabled alert joined with its owning user and location.
    ///
    /// The join is resolved here, up front, into [`ActiveAlert`] values.
    /// Rows that no longer resolve — the user or location was deleted in a
    /// race with the runner — and rows whose condition or threshold fails
    /// to parse are skipped with a warning, never an error: one bad alert
    /// must not stop the batch.
    pub async fn load_active_alerts(&self) -> anyhow::Result<Vec<ActiveAlert>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id AS alert_id, a.condition, a.threshold, a.last_notified,
                   u.name AS user_name, u.email AS user_email,
                   l.id AS loc_id, l.label AS location_label, l.city AS city
            FROM alerts a
            LEFT JOIN users u ON u.id = a.user_id
            LEFT JOIN locations l ON l.id = a.location_id
            WHERE a.is_enabled = 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut alerts = Vec::with_capacity(rows.len());
        for row in &rows {
            let alert_id: i64 = row.get("alert_id");

            let user_email: Option<String> = row.get("user_email");
            let location_id: Option<i64> = row.get("loc_id");
            let (Some(user_email), Some(location_id)) = (user_email, location_id) else {
                warn!(alert_id, "skipping alert with missing user or location");
                continue;
            };

            let condition_str: String = row.get("condition");
            let Some(condition) = AlertCondition::parse(&condition_str) else {
                warn!(alert_id, condition = %condition_str, "skipping alert with unknown condition");
                continue;
            };

            let threshold_json: String = row.get("threshold");
            let threshold: Threshold = match serde_json::from_str(&threshold_json) {
                Ok(threshold) => threshold,
                Err(e) => {
                    warn!(alert_id, error = %e, "skipping alert with malformed threshold");
                    continue;
                }
            };

            let last_notified: Option<i64> = row.get("last_notified");

            alerts.push(ActiveAlert {
                alert_id,
                condition,
                threshold,
                last_notified: last_notified.and_then(|ts| DateTime::from_timestamp(ts, 0)),
                user_name: row.get("user_name"),
                user_email,
                location_id,
                location_label: row.get("location_label"),
                city: row.get("city"),
            });
        }

        Ok(alerts)
    }

    /// Record a successful notification.
    ///
    /// The update only lands while the alert still exists and is enabled,
    /// so a user toggle racing the runner is never clobbered. Returns
    /// whether the timestamp was written.
    pub async fn mark_notified(&self, alert_id: i64, when: DateTime<Utc>) -> anyhow::Result<bool> {
        let result =
            sqlx::query("UPDATE alerts SET last_notified = ? WHERE id = ? AND is_enabled = 1")
                .bind(when.timestamp())
                .bind(alert_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Weather history
    // ------------------------------------------------------------------

    /// Append a snapshot to a location's history. Never updates existing
    /// rows.
    pub async fn insert_history(
        &self,
        location_id: i64,
        snapshot: &WeatherSnapshot,
        source: SnapshotSource,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO weather_history (location_id, city, logged_at, provider_ts, snapshot, source)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(location_id)
        .bind(&snapshot.city)
        .bind(Utc::now().timestamp())
        .bind(snapshot.provider_timestamp)
        .bind(serde_json::to_string(snapshot)?)
        .bind(source.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Historical snapshots for a location within a time range, oldest
    /// first.
    pub async fn history_for_location(
        &self,
        location_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, location_id, city, logged_at, snapshot, source
            FROM weather_history
            WHERE location_id = ? AND logged_at >= ? AND logged_at <= ?
            ORDER BY logged_at ASC
            "#,
        )
        .bind(location_id)
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let snapshot_json: String = row.get("snapshot");
                let snapshot: WeatherSnapshot = serde_json::from_str(&snapshot_json)?;
                let logged_ts: i64 = row.get("logged_at");
                let source_str: String = row.get("source");

                Ok(HistoryRecord {
                    id: row.get("id"),
                    location_id: row.get("location_id"),
                    city: row.get("city"),
                    logged_at: DateTime::from_timestamp(logged_ts, 0).unwrap_or_default(),
                    snapshot,
                    source: SnapshotSource::parse(&source_str).unwrap_or(SnapshotSource::Fresh),
                })
            })
            .collect()
    }
}

fn row_to_alert(row: &SqliteRow) -> anyhow::Result<Alert> {
    let condition_str: String = row.get("condition");
    let condition = AlertCondition::parse(&condition_str)
        .ok_or_else(|| anyhow::anyhow!("unknown alert condition '{condition_str}'"))?;
    let threshold_json: String = row.get("threshold");
    let threshold: Threshold = serde_json::from_str(&threshold_json)?;
    let last_notified: Option<i64> = row.get("last_notified");

    Ok(Alert {
        id: row.get("id"),
        user_id: row.get("user_id"),
        location_id: row.get("location_id"),
        city: row.get("city"),
        condition,
        threshold,
        is_enabled: row.get("is_enabled"),
        last_notified: last_notified.and_then(|ts| DateTime::from_timestamp(ts, 0)),
    })
}
