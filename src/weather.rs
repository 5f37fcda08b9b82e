//! Weather lookup: the cache in front of the provider, with snapshot
//! history on the side.
//!
//! The lookup path is the only place snapshots enter the system: a cache
//! hit is returned as-is, a miss goes to the provider, and a fresh fetch
//! is cached and (when the caller has a saved location to attach it to)
//! appended to the weather history. History writes are best-effort — a
//! persistence failure is logged and the caller still gets its snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::cache::WeatherCache;
use crate::error::WeatherError;
use crate::model::{HistoryRecord, SnapshotSource, WeatherSnapshot, normalize_city};
use crate::provider::WeatherProvider;
use crate::storage::Storage;

/// Cached weather lookups plus best-effort snapshot history.
///
/// Cheap to clone; every city worker in a run holds its own handle.
#[derive(Clone)]
pub struct WeatherService {
    cache: Arc<WeatherCache>,
    provider: Arc<dyn WeatherProvider>,
    storage: Storage,
}

impl WeatherService {
    pub fn new(cache: WeatherCache, provider: Arc<dyn WeatherProvider>, storage: Storage) -> Self {
        Self {
            cache: Arc::new(cache),
            provider,
            storage,
        }
    }

    /// Current weather for a city, served from cache when fresh.
    ///
    /// Returns the snapshot together with where it came from. Provider
    /// failures propagate unchanged on a miss; nothing is cached and no
    /// history is written for a failed fetch.
    pub async fn current_weather(
        &self,
        city: &str,
        location_id: Option<i64>,
    ) -> Result<(WeatherSnapshot, SnapshotSource), WeatherError> {
        let key = normalize_city(city);

        if let Some(snapshot) = self.cache.get(&key) {
            debug!(city = %key, "weather cache hit");
            return Ok((snapshot, SnapshotSource::Cache));
        }

        debug!(city = %key, "weather cache miss, fetching from provider");
        let snapshot = self.provider.current_weather(&key).await?;
        self.cache.put(&key, snapshot.clone());

        if let Some(location_id) = location_id {
            if let Err(e) = self
                .storage
                .insert_history(location_id, &snapshot, SnapshotSource::Fresh)
                .await
            {
                warn!(city = %key, location_id, error = %e, "failed to persist weather history");
            }
        }

        Ok((snapshot, SnapshotSource::Fresh))
    }

    /// Historical snapshots for a saved location, oldest first.
    pub async fn history(
        &self,
        location_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<HistoryRecord>> {
        self.storage.history_for_location(location_id, from, to).await
    }
}
