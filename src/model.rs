//! Domain types for Stormwatch.
//!
//! Everything the pipeline passes around is a plain value: a weather
//! snapshot is produced once per provider call and never mutated, alerts
//! are loaded fully resolved (user and location joined in), and history
//! records are append-only. The only field the runner ever writes back is
//! an alert's `last_notified` timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical form of a city key: trimmed, lowercase.
///
/// Used everywhere a city names a cache entry, an alert group, or a saved
/// location, so "  London " and "london" are the same place.
pub fn normalize_city(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A normalized weather reading for one city at one point in time.
///
/// Metric units throughout: Celsius, m/s, hPa, mm. Constructed once from a
/// provider payload and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    /// Normalized city key this snapshot was fetched for.
    pub city: String,

    /// Air temperature in Celsius.
    pub temperature: f64,

    /// Perceived temperature in Celsius.
    pub feels_like: f64,

    /// Minimum temperature currently observed in the area.
    pub temp_min: f64,

    /// Maximum temperature currently observed in the area.
    pub temp_max: f64,

    /// Atmospheric pressure in hPa.
    pub pressure: f64,

    /// Relative humidity, 0-100.
    pub humidity: f64,

    /// Free-text condition description (e.g. "light rain").
    pub description: String,

    /// Provider icon code (e.g. "10d").
    pub icon: String,

    /// Wind speed in m/s.
    pub wind_speed: f64,

    /// Wind direction in degrees.
    pub wind_deg: f64,

    /// Cloud cover percentage.
    pub cloudiness: f64,

    /// Rain volume over the last 1-3 hours in mm, 0 when the provider
    /// omits the block.
    #[serde(default)]
    pub rain_volume: f64,

    /// Sunrise as epoch seconds, when reported.
    pub sunrise: Option<i64>,

    /// Sunset as epoch seconds, when reported.
    pub sunset: Option<i64>,

    /// The provider's own observation timestamp, epoch seconds.
    pub provider_timestamp: i64,

    /// The city name as the provider spells it, kept for verification.
    pub provider_city_name: String,
}

/// Where a returned snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// Fetched from the provider during this lookup.
    Fresh,
    /// Served from the in-process cache.
    Cache,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSource::Fresh => "fresh",
            SnapshotSource::Cache => "cache",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fresh" => Some(SnapshotSource::Fresh),
            "cache" => Some(SnapshotSource::Cache),
            _ => None,
        }
    }
}

/// Which weather metric/comparison an alert checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    /// Temperature greater than a numeric threshold.
    TempGt,
    /// Temperature less than a numeric threshold.
    TempLt,
    /// Humidity greater than a numeric threshold.
    HumidityGt,
    /// Wind speed greater than a numeric threshold.
    WindGt,
    /// Measurable rain above a numeric threshold, or "rain" in the
    /// description.
    RainLikely,
    /// Description contains a text threshold.
    DescContains,
}

impl AlertCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::TempGt => "temp_gt",
            AlertCondition::TempLt => "temp_lt",
            AlertCondition::HumidityGt => "humidity_gt",
            AlertCondition::WindGt => "wind_gt",
            AlertCondition::RainLikely => "rain_likely",
            AlertCondition::DescContains => "desc_contains",
        }
    }

    /// Parse a stored condition string. Unknown strings are `None` so a
    /// bad row can be skipped instead of failing a batch.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "temp_gt" => Some(AlertCondition::TempGt),
            "temp_lt" => Some(AlertCondition::TempLt),
            "humidity_gt" => Some(AlertCondition::HumidityGt),
            "wind_gt" => Some(AlertCondition::WindGt),
            "rain_likely" => Some(AlertCondition::RainLikely),
            "desc_contains" => Some(AlertCondition::DescContains),
            _ => None,
        }
    }

    pub const fn all() -> &'static [AlertCondition] {
        &[
            AlertCondition::TempGt,
            AlertCondition::TempLt,
            AlertCondition::HumidityGt,
            AlertCondition::WindGt,
            AlertCondition::RainLikely,
            AlertCondition::DescContains,
        ]
    }

    /// The threshold kind this condition compares against.
    pub fn threshold_kind(&self) -> ThresholdKind {
        match self {
            AlertCondition::DescContains => ThresholdKind::Text,
            _ => ThresholdKind::Numeric,
        }
    }

    /// Whether a threshold value has the kind this condition expects.
    pub fn accepts(&self, threshold: &Threshold) -> bool {
        self.threshold_kind() == threshold.kind()
    }
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of value a condition compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdKind {
    Numeric,
    Text,
}

impl ThresholdKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdKind::Numeric => "numeric",
            ThresholdKind::Text => "text",
        }
    }
}

/// Comparison value for an alert condition.
///
/// Serialized untagged, so a numeric threshold round-trips as a JSON
/// number and a text threshold as a JSON string. The kind is fixed per
/// condition when the alert is created; the evaluator still defensively
/// type-checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Numeric(f64),
    Text(String),
}

impl Threshold {
    pub fn kind(&self) -> ThresholdKind {
        match self {
            Threshold::Numeric(_) => ThresholdKind::Numeric,
            Threshold::Text(_) => ThresholdKind::Text,
        }
    }

    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Threshold::Numeric(value) => Some(*value),
            Threshold::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Threshold::Text(value) => Some(value),
            Threshold::Numeric(_) => None,
        }
    }
}

/// A registered user, as far as this core cares: a notification target.
///
/// Signup and authentication live outside this crate.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// A city a user has saved, owned by exactly one user.
///
/// `(user_id, city)` is unique; deleting a location cascades to its alerts.
#[derive(Debug, Clone)]
pub struct SavedLocation {
    pub id: i64,
    pub user_id: i64,
    /// User-facing label, e.g. "Home" or "London".
    pub label: String,
    /// Normalized city key used for provider lookups.
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A user-configured alert as stored.
#[derive(Debug, Clone)]
pub struct Alert {
    pub id: i64,
    pub user_id: i64,
    pub location_id: i64,
    /// Denormalized city key so the runner can group without a join.
    pub city: String,
    pub condition: AlertCondition,
    pub threshold: Threshold,
    pub is_enabled: bool,
    /// When the runner last sent a notification for this alert, if ever.
    /// Written only by the runner's conditional update.
    pub last_notified: Option<DateTime<Utc>>,
}

/// An enabled alert joined with its owning user and location, ready for
/// one evaluation pass.
///
/// The repository resolves the join up front so the runner never chases
/// references mid-batch.
#[derive(Debug, Clone)]
pub struct ActiveAlert {
    pub alert_id: i64,
    pub condition: AlertCondition,
    pub threshold: Threshold,
    pub last_notified: Option<DateTime<Utc>>,
    pub user_name: String,
    pub user_email: String,
    pub location_id: i64,
    pub location_label: String,
    pub city: String,
}

/// One appended historical weather reading for a saved location.
///
/// Never updated or deleted by this core; retention is someone else's
/// policy.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub location_id: i64,
    pub city: String,
    /// When the record was written, not when the provider observed it.
    pub logged_at: DateTime<Utc>,
    pub snapshot: WeatherSnapshot,
    pub source: SnapshotSource,
}
