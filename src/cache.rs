//! In-process TTL cache for weather snapshots.
//!
//! One entry per normalized city. A read past an entry's expiry is a miss,
//! never a silently-stale snapshot. Provider errors are never stored, so
//! there is no negative caching. City workers hit the cache concurrently; a
//! stale overwrite of a fresher entry is tolerable, corruption is not.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::model::{WeatherSnapshot, normalize_city};

struct CacheEntry {
    snapshot: WeatherSnapshot,
    expires_at: Instant,
}

/// Time-bounded map from a normalized city key to its latest snapshot.
///
/// Constructed once at startup and injected into the lookup path; there is
/// no process-global instance.
pub struct WeatherCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
}

impl WeatherCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Look up the snapshot for a city.
    ///
    /// Returns `None` on an absent or expired entry; expired entries are
    /// dropped on the way out.
    pub fn get(&self, city: &str) -> Option<WeatherSnapshot> {
        let key = normalize_city(city);
        let now = Instant::now();

        {
            let entries = read_lock(&self.entries);
            match entries.get(&key) {
                Some(entry) if entry.expires_at > now => return Some(entry.snapshot.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Entry exists but has expired; re-check under the write lock in
        // case a concurrent put refreshed it.
        let mut entries = write_lock(&self.entries);
        if let Some(entry) = entries.get(&key) {
            if entry.expires_at > now {
                return Some(entry.snapshot.clone());
            }
            entries.remove(&key);
        }
        None
    }

    /// Store a snapshot under the default TTL.
    pub fn put(&self, city: &str, snapshot: WeatherSnapshot) {
        self.put_with_ttl(city, snapshot, self.default_ttl);
    }

    /// Store a snapshot with an explicit TTL.
    pub fn put_with_ttl(&self, city: &str, snapshot: WeatherSnapshot, ttl: Duration) {
        let key = normalize_city(city);
        let entry = CacheEntry {
            snapshot,
            expires_at: Instant::now() + ttl,
        };
        write_lock(&self.entries).insert(key, entry);
    }
}

// A poisoned lock only means another worker panicked between whole-entry
// operations; the map itself is still consistent, so keep serving.
fn read_lock(
    lock: &RwLock<HashMap<String, CacheEntry>>,
) -> std::sync::RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock(
    lock: &RwLock<HashMap<String, CacheEntry>>,
) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
