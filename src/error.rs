//! Error taxonomy for weather lookups.

use thiserror::Error;

/// Failure modes of a weather lookup.
///
/// `CityNotFound` is terminal for that lookup: the provider does not know
/// the place, so retrying will not help and the caller is told which city
/// failed. `Provider` covers everything transient on the provider side
/// (timeouts, connection errors, non-2xx responses, malformed payloads);
/// callers may retry on a later cycle but never within the same run.
///
/// Persistence and notification failures are deliberately *not* part of
/// this enum: they are logged where they happen and must never abort a
/// lookup or a batch run.
#[derive(Debug, Error)]
pub enum WeatherError {
    /// The provider reported the requested city as unknown.
    #[error("city not found: {0}")]
    CityNotFound(String),

    /// Transport, timeout, or payload failure talking to the provider.
    #[error("weather provider error: {0}")]
    Provider(String),
}

impl WeatherError {
    /// Whether this error is a terminal unknown-city result.
    pub fn is_city_not_found(&self) -> bool {
        matches!(self, WeatherError::CityNotFound(_))
    }
}
