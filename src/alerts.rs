//! Alert condition evaluation and notification formatting.
//!
//! Evaluation is a pure function over a condition, a threshold, and a
//! snapshot. It is total: a threshold of the wrong kind for its condition
//! simply fails to match, because a malformed alert must never take down
//! the batch it is evaluated in.

use crate::model::{ActiveAlert, AlertCondition, Threshold, WeatherSnapshot};

/// Decide whether a snapshot satisfies an alert condition.
pub fn should_notify(
    condition: AlertCondition,
    threshold: &Threshold,
    snapshot: &WeatherSnapshot,
) -> bool {
    match condition {
        AlertCondition::TempGt => threshold
            .as_numeric()
            .is_some_and(|limit| snapshot.temperature > limit),
        AlertCondition::TempLt => threshold
            .as_numeric()
            .is_some_and(|limit| snapshot.temperature < limit),
        AlertCondition::HumidityGt => threshold
            .as_numeric()
            .is_some_and(|limit| snapshot.humidity > limit),
        AlertCondition::WindGt => threshold
            .as_numeric()
            .is_some_and(|limit| snapshot.wind_speed > limit),
        AlertCondition::RainLikely => {
            // Measured rain above the threshold (0 when unset or of the
            // wrong kind), or the provider already calls it rain.
            let limit = threshold.as_numeric().unwrap_or(0.0);
            snapshot.rain_volume > limit
                || snapshot.description.to_lowercase().contains("rain")
        }
        AlertCondition::DescContains => threshold.as_text().is_some_and(|needle| {
            snapshot
                .description
                .to_lowercase()
                .contains(&needle.to_lowercase())
        }),
    }
}

/// Human-readable rendering of a condition for notification bodies.
pub fn format_condition(condition: AlertCondition, threshold: &Threshold) -> String {
    match (condition, threshold) {
        (AlertCondition::TempGt, Threshold::Numeric(limit)) => {
            format!("Temperature is above {limit}°C")
        }
        (AlertCondition::TempLt, Threshold::Numeric(limit)) => {
            format!("Temperature is below {limit}°C")
        }
        (AlertCondition::HumidityGt, Threshold::Numeric(limit)) => {
            format!("Humidity is above {limit}%")
        }
        (AlertCondition::WindGt, Threshold::Numeric(limit)) => {
            format!("Wind speed is above {limit} m/s")
        }
        (AlertCondition::RainLikely, _) => "Rain is likely".to_string(),
        (AlertCondition::DescContains, Threshold::Text(text)) => {
            format!("Description contains \"{text}\"")
        }
        (condition, threshold) => format!("{condition} {threshold:?}"),
    }
}

/// A rendered notification, ready for the notifier.
#[derive(Debug, Clone)]
pub struct Notification {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Build the notification for a triggered alert.
pub fn build_notification(alert: &ActiveAlert, snapshot: &WeatherSnapshot) -> Notification {
    let condition = format_condition(alert.condition, &alert.threshold);
    let subject = format!("Weather Alert Triggered for {}", alert.location_label);

    let text = format!(
        "Hi {name},\n\
         \n\
         A weather alert you set for {label} ({city}) has been triggered.\n\
         \n\
         Condition: {condition}\n\
         Current Weather:\n\
         - Temperature: {temperature}°C\n\
         - Feels Like: {feels_like}°C\n\
         - Humidity: {humidity}%\n\
         - Wind: {wind} m/s\n\
         - Description: {description}\n\
         \n\
         You can manage your alerts in the dashboard.\n",
        name = alert.user_name,
        label = alert.location_label,
        city = alert.city,
        temperature = snapshot.temperature,
        feels_like = snapshot.feels_like,
        humidity = snapshot.humidity,
        wind = snapshot.wind_speed,
        description = snapshot.description,
    );

    let html = format!(
        "<p>Hi {name},</p>\n\
         <p>A weather alert you set for <strong>{label} ({city})</strong> has been triggered.</p>\n\
         <p><strong>Condition:</strong> {condition}</p>\n\
         <p><strong>Current Weather:</strong></p>\n\
         <ul>\n\
         <li>Temperature: {temperature}&deg;C</li>\n\
         <li>Feels Like: {feels_like}&deg;C</li>\n\
         <li>Humidity: {humidity}%</li>\n\
         <li>Wind: {wind} m/s</li>\n\
         <li>Description: {description}</li>\n\
         </ul>\n\
         <p>You can manage your alerts in the dashboard.</p>\n",
        name = alert.user_name,
        label = alert.location_label,
        city = alert.city,
        temperature = snapshot.temperature,
        feels_like = snapshot.feels_like,
        humidity = snapshot.humidity,
        wind = snapshot.wind_speed,
        description = snapshot.description,
    );

    Notification {
        subject,
        text,
        html,
    }
}
