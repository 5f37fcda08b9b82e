//! Weather provider client.
//!
//! Talks to an OpenWeather-compatible current-conditions endpoint and
//! normalizes its payload into a [`WeatherSnapshot`]. Units are metric
//! (Celsius, m/s) as a fixed contract, not a per-call option.
//!
//! Error classification: an unknown city (HTTP 404) is
//! [`WeatherError::CityNotFound`]; everything else — timeouts, connection
//! failures, non-2xx responses, malformed or partial payloads — is
//! [`WeatherError::Provider`]. A payload missing any required block
//! (temperature, condition list, wind) fails outright rather than
//! producing a half-populated snapshot.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::WeatherError;
use crate::model::{WeatherSnapshot, normalize_city};

/// Default OpenWeather API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// Anything that can produce a current-conditions snapshot for a city.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current_weather(&self, city: &str) -> Result<WeatherSnapshot, WeatherError>;
}

/// Client for the OpenWeather current-conditions endpoint.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    /// Create a client against the public API.
    ///
    /// The timeout bounds every provider call so one unreachable endpoint
    /// cannot stall a whole run.
    pub fn new(api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        Self::with_base_url(api_key, timeout, DEFAULT_BASE_URL)
    }

    /// Create a client against a custom API root (for tests).
    pub fn with_base_url(
        api_key: String,
        timeout: Duration,
        base_url: &str,
    ) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn current_weather(&self, city: &str) -> Result<WeatherSnapshot, WeatherError> {
        let url = format!("{}/weather", self.base_url);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("q", city),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .map_err(|e| WeatherError::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(WeatherError::CityNotFound(normalize_city(city)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WeatherError::Provider(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(WeatherError::Provider(format!(
                "request failed with status {status}: {}",
                truncate_body(&body)
            )));
        }

        let parsed: OwCurrentResponse = serde_json::from_str(&body)
            .map_err(|e| WeatherError::Provider(format!("malformed payload: {e}")))?;

        Ok(parsed.into_snapshot(city))
    }
}

// Required blocks deserialize into non-optional fields, so a partial
// payload is rejected at parse time instead of leaking a half-populated
// snapshot.
#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: String,
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
    #[serde(default)]
    clouds: Option<OwClouds>,
    #[serde(default)]
    rain: Option<OwRain>,
    #[serde(default)]
    sys: Option<OwSys>,
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    temp_min: f64,
    temp_max: f64,
    pressure: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
    #[serde(default)]
    icon: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
    #[serde(default)]
    deg: f64,
}

#[derive(Debug, Deserialize, Default)]
struct OwClouds {
    #[serde(default)]
    all: f64,
}

#[derive(Debug, Deserialize, Default)]
struct OwRain {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
    #[serde(rename = "3h")]
    three_hours: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct OwSys {
    sunrise: Option<i64>,
    sunset: Option<i64>,
}

impl OwCurrentResponse {
    fn into_snapshot(self, requested_city: &str) -> WeatherSnapshot {
        let (description, icon) = self
            .weather
            .into_iter()
            .next()
            .map(|w| (w.description, w.icon))
            .unwrap_or_else(|| ("N/A".to_string(), String::new()));

        let rain_volume = self
            .rain
            .map(|r| r.one_hour.or(r.three_hours).unwrap_or(0.0))
            .unwrap_or(0.0);

        WeatherSnapshot {
            city: normalize_city(requested_city),
            temperature: self.main.temp,
            feels_like: self.main.feels_like,
            temp_min: self.main.temp_min,
            temp_max: self.main.temp_max,
            pressure: self.main.pressure,
            humidity: self.main.humidity,
            description,
            icon,
            wind_speed: self.wind.speed,
            wind_deg: self.wind.deg,
            cloudiness: self.clouds.map(|c| c.all).unwrap_or(0.0),
            rain_volume,
            sunrise: self.sys.as_ref().and_then(|s| s.sunrise),
            sunset: self.sys.as_ref().and_then(|s| s.sunset),
            provider_timestamp: self.dt,
            provider_city_name: self.name,
        }
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let truncated: String = body.chars().take(MAX).collect();
        format!("{truncated}...")
    } else {
        body.to_string()
    }
}
