//! The periodic alert batch: fetch, evaluate, notify, record.
//!
//! One run loads every enabled alert fully resolved, partitions the set by
//! normalized city so each distinct city costs exactly one provider call,
//! and processes cities independently on a bounded worker pool. Per
//! triggered alert the notifier is invoked and, on success, the alert's
//! `last_notified` is recorded through a conditional update. Every failure
//! inside a run is caught and logged; nothing here may crash the host
//! process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::alerts::{build_notification, should_notify};
use crate::model::{ActiveAlert, normalize_city};
use crate::notifier::Notifier;
use crate::storage::Storage;
use crate::weather::WeatherService;

/// Outcome counts for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Enabled alerts that resolved and entered evaluation.
    pub alerts_checked: usize,
    /// Distinct cities in the batch.
    pub cities: usize,
    /// Cities skipped because their weather lookup failed.
    pub cities_failed: usize,
    /// Alerts whose condition matched the snapshot.
    pub triggered: usize,
    /// Notifications actually delivered.
    pub notified: usize,
    /// Deliveries that failed (retried next run).
    pub notify_failed: usize,
    /// Triggered alerts suppressed by the cooldown window.
    pub suppressed: usize,
}

impl RunSummary {
    fn absorb(&mut self, city: CityOutcome) {
        self.triggered += city.triggered;
        self.notified += city.notified;
        self.notify_failed += city.notify_failed;
        self.suppressed += city.suppressed;
        if city.failed {
            self.cities_failed += 1;
        }
    }
}

#[derive(Debug, Default)]
struct CityOutcome {
    triggered: usize,
    notified: usize,
    notify_failed: usize,
    suppressed: usize,
    failed: bool,
}

/// Drives the periodic alert check.
///
/// Stateless between runs apart from what it persists onto alert rows. A
/// run guard keeps scheduled ticks and manual triggers from overlapping:
/// the later trigger is dropped, never queued, so a slow run cannot cause
/// duplicate notifications.
pub struct AlertRunner {
    storage: Storage,
    weather: WeatherService,
    notifier: Arc<dyn Notifier>,
    max_concurrent_cities: usize,
    /// Minimum interval between repeat notifications for one alert.
    /// `None` re-notifies every run the condition holds.
    cooldown: Option<Duration>,
    run_guard: Mutex<()>,
}

impl AlertRunner {
    pub fn new(
        storage: Storage,
        weather: WeatherService,
        notifier: Arc<dyn Notifier>,
        max_concurrent_cities: usize,
        cooldown: Option<Duration>,
    ) -> Self {
        Self {
            storage,
            weather,
            notifier,
            max_concurrent_cities: max_concurrent_cities.max(1),
            cooldown,
            run_guard: Mutex::new(()),
        }
    }

    /// Run one alert batch now.
    ///
    /// Returns `None` when another run is already in flight and this
    /// trigger was skipped.
    pub async fn run_once(&self) -> Option<RunSummary> {
        let Ok(_guard) = self.run_guard.try_lock() else {
            warn!("alert check already in flight, skipping this trigger");
            return None;
        };
        Some(self.check_alerts().await)
    }

    /// Run the batch forever on a fixed cadence.
    ///
    /// Ticks align to UTC interval boundaries, so the default hourly
    /// interval fires at the top of the hour. A tick that lands while a
    /// previous run is still in flight is skipped by the run guard.
    pub async fn run_every(&self, interval: Duration) {
        let interval_secs = interval.as_secs().max(1);
        info!(interval_secs, "alert check loop started");
        loop {
            let wait = seconds_until_next_boundary(interval_secs, Utc::now().timestamp());
            tokio::time::sleep(Duration::from_secs(wait)).await;
            self.run_once().await;
        }
    }

    async fn check_alerts(&self) -> RunSummary {
        let started = Utc::now();
        info!("running scheduled alert check");

        let alerts = match self.storage.load_active_alerts().await {
            Ok(alerts) => alerts,
            Err(e) => {
                error!(error = %e, "failed to load active alerts");
                return RunSummary::default();
            }
        };

        if alerts.is_empty() {
            info!("no active alerts");
            return RunSummary::default();
        }

        let alerts_checked = alerts.len();

        // One provider call per distinct city, however many alerts and
        // users watch it.
        let mut by_city: HashMap<String, Vec<ActiveAlert>> = HashMap::new();
        for alert in alerts {
            by_city
                .entry(normalize_city(&alert.city))
                .or_default()
                .push(alert);
        }

        let mut summary = RunSummary {
            alerts_checked,
            cities: by_city.len(),
            ..RunSummary::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_cities));
        let mut workers = JoinSet::new();
        for (city, group) in by_city {
            let semaphore = Arc::clone(&semaphore);
            let weather = self.weather.clone();
            let storage = self.storage.clone();
            let notifier = Arc::clone(&self.notifier);
            let cooldown = self.cooldown;
            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                check_city(&city, group, weather, storage, notifier, cooldown).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => summary.absorb(outcome),
                Err(e) => {
                    error!(error = %e, "city worker panicked");
                    summary.cities_failed += 1;
                }
            }
        }

        info!(
            checked = summary.alerts_checked,
            cities = summary.cities,
            cities_failed = summary.cities_failed,
            triggered = summary.triggered,
            notified = summary.notified,
            notify_failed = summary.notify_failed,
            suppressed = summary.suppressed,
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "alert check finished"
        );
        summary
    }
}

/// Check every alert watching one city against a single snapshot.
///
/// A lookup failure skips the whole group for this run without touching
/// any alert state; other cities are unaffected.
async fn check_city(
    city: &str,
    alerts: Vec<ActiveAlert>,
    weather: WeatherService,
    storage: Storage,
    notifier: Arc<dyn Notifier>,
    cooldown: Option<Duration>,
) -> CityOutcome {
    let mut outcome = CityOutcome::default();
    let cooldown = cooldown.and_then(|d| chrono::Duration::from_std(d).ok());

    // The first alert's location links the history record for this fetch.
    let history_link = alerts.first().map(|alert| alert.location_id);
    let snapshot = match weather.current_weather(city, history_link).await {
        Ok((snapshot, _source)) => snapshot,
        Err(e) => {
            warn!(
                city = %city,
                alerts = alerts.len(),
                error = %e,
                "weather lookup failed, skipping this city for this run"
            );
            outcome.failed = true;
            return outcome;
        }
    };

    for alert in &alerts {
        if !should_notify(alert.condition, &alert.threshold, &snapshot) {
            continue;
        }
        outcome.triggered += 1;

        let now = Utc::now();
        if let (Some(window), Some(last)) = (cooldown, alert.last_notified) {
            if now - last < window {
                info!(
                    alert_id = alert.alert_id,
                    city = %city,
                    "alert matched but is within its cooldown window"
                );
                outcome.suppressed += 1;
                continue;
            }
        }

        info!(
            alert_id = alert.alert_id,
            user = %alert.user_email,
            city = %city,
            condition = alert.condition.as_str(),
            "alert triggered"
        );

        let message = build_notification(alert, &snapshot);
        match notifier
            .send(&alert.user_email, &message.subject, &message.text, &message.html)
            .await
        {
            Ok(()) => {
                outcome.notified += 1;
                match storage.mark_notified(alert.alert_id, now).await {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        alert_id = alert.alert_id,
                        "alert was disabled or deleted mid-run, notification time not recorded"
                    ),
                    Err(e) => error!(
                        alert_id = alert.alert_id,
                        error = %e,
                        "failed to record notification time"
                    ),
                }
            }
            Err(e) => {
                // last_notified stays untouched so the next run retries.
                outcome.notify_failed += 1;
                error!(
                    alert_id = alert.alert_id,
                    user = %alert.user_email,
                    error = %e,
                    "notification delivery failed"
                );
            }
        }
    }

    outcome
}

/// Seconds until the next UTC boundary of `interval_secs`, e.g. the next
/// top of the hour for a 3600 s interval. Exactly on a boundary, the full
/// interval is returned so a tick never fires twice in one second.
fn seconds_until_next_boundary(interval_secs: u64, now_ts: i64) -> u64 {
    let now = now_ts.max(0) as u64;
    interval_secs - (now % interval_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::cache::WeatherCache;
    use crate::error::WeatherError;
    use crate::model::{AlertCondition, Threshold, WeatherSnapshot};
    use crate::provider::WeatherProvider;

    fn snapshot(city: &str, temperature: f64, description: &str) -> WeatherSnapshot {
        WeatherSnapshot {
            city: city.to_string(),
            temperature,
            feels_like: temperature - 1.0,
            temp_min: temperature - 2.0,
            temp_max: temperature + 2.0,
            pressure: 1012.0,
            humidity: 60.0,
            description: description.to_string(),
            icon: "01d".to_string(),
            wind_speed: 3.0,
            wind_deg: 120.0,
            cloudiness: 20.0,
            rain_volume: 0.0,
            sunrise: None,
            sunset: None,
            provider_timestamp: 1_700_000_000,
            provider_city_name: city.to_string(),
        }
    }

    /// Provider scripted per city: a snapshot, a failure, or an unknown
    /// city. Counts total calls and can delay to hold a run in flight.
    struct ScriptedProvider {
        by_city: HashMap<String, Result<WeatherSnapshot, &'static str>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self {
                by_city: HashMap::new(),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        fn with_snapshot(mut self, city: &str, snap: WeatherSnapshot) -> Self {
            self.by_city.insert(city.to_string(), Ok(snap));
            self
        }

        fn with_failure(mut self, city: &str) -> Self {
            self.by_city.insert(city.to_string(), Err("provider down"));
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WeatherProvider for ScriptedProvider {
        async fn current_weather(&self, city: &str) -> Result<WeatherSnapshot, WeatherError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.by_city.get(city) {
                Some(Ok(snap)) => Ok(snap.clone()),
                Some(Err(message)) => Err(WeatherError::Provider((*message).to_string())),
                None => Err(WeatherError::CityNotFound(city.to_string())),
            }
        }
    }

    /// Notifier that records deliveries and can be told to fail.
    #[derive(Default)]
    struct RecordingNotifier {
        sent: StdMutex<Vec<(String, String)>>,
        fail: AtomicBool,
    }

    impl RecordingNotifier {
        fn failing() -> Self {
            let notifier = Self::default();
            notifier.fail.store(true, Ordering::SeqCst);
            notifier
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(
            &self,
            to: &str,
            subject: &str,
            _text: &str,
            _html: &str,
        ) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("smtp unavailable");
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    struct Harness {
        storage: Storage,
        provider: Arc<ScriptedProvider>,
        notifier: Arc<RecordingNotifier>,
        runner: Arc<AlertRunner>,
        // Holds the temp dir (and its database file) alive for the test
        _dir: tempfile::TempDir,
    }

    async fn harness(provider: ScriptedProvider, notifier: RecordingNotifier) -> Harness {
        harness_with_cooldown(provider, notifier, None).await
    }

    async fn harness_with_cooldown(
        provider: ScriptedProvider,
        notifier: RecordingNotifier,
        cooldown: Option<Duration>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}/stormwatch-test.db?mode=rwc", dir.path().display());
        let storage = Storage::new(&url).await.unwrap();

        let provider = Arc::new(provider);
        let notifier = Arc::new(notifier);
        let weather = WeatherService::new(
            WeatherCache::new(Duration::from_secs(60)),
            Arc::clone(&provider) as Arc<dyn WeatherProvider>,
            storage.clone(),
        );
        let runner = Arc::new(AlertRunner::new(
            storage.clone(),
            weather,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            4,
            cooldown,
        ));

        Harness {
            storage,
            provider,
            notifier,
            runner,
            _dir: dir,
        }
    }

    async fn seed_alert(
        storage: &Storage,
        email: &str,
        city: &str,
        condition: AlertCondition,
        threshold: Threshold,
    ) -> i64 {
        let user_id = storage.insert_user("Ada", email).await.unwrap();
        let location_id = storage
            .insert_location(user_id, "Home", city, None, None)
            .await
            .unwrap();
        storage
            .insert_alert(user_id, location_id, condition, threshold)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn triggered_alert_notifies_and_records_time() {
        let provider =
            ScriptedProvider::new().with_snapshot("london", snapshot("london", 25.0, "sunny"));
        let h = harness(provider, RecordingNotifier::default()).await;
        let alert_id = seed_alert(
            &h.storage,
            "ada@example.com",
            "london",
            AlertCondition::TempGt,
            Threshold::Numeric(20.0),
        )
        .await;

        let summary = h.runner.run_once().await.unwrap();

        assert_eq!(summary.alerts_checked, 1);
        assert_eq!(summary.triggered, 1);
        assert_eq!(summary.notified, 1);
        assert_eq!(summary.notify_failed, 0);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ada@example.com");
        assert_eq!(sent[0].1, "Weather Alert Triggered for Home");

        let alert = h.storage.get_alert(alert_id).await.unwrap().unwrap();
        assert!(alert.last_notified.is_some());
    }

    #[tokio::test]
    async fn non_matching_alert_is_left_alone() {
        let provider =
            ScriptedProvider::new().with_snapshot("london", snapshot("london", 10.0, "light rain"));
        let h = harness(provider, RecordingNotifier::default()).await;
        let alert_id = seed_alert(
            &h.storage,
            "ada@example.com",
            "london",
            AlertCondition::DescContains,
            Threshold::Text("snow".into()),
        )
        .await;

        let summary = h.runner.run_once().await.unwrap();

        assert_eq!(summary.triggered, 0);
        assert!(h.notifier.sent().is_empty());

        let alert = h.storage.get_alert(alert_id).await.unwrap().unwrap();
        assert!(alert.last_notified.is_none());
    }

    #[tokio::test]
    async fn one_provider_call_per_city_regardless_of_alert_count() {
        let provider =
            ScriptedProvider::new().with_snapshot("london", snapshot("london", 25.0, "sunny"));
        let h = harness(provider, RecordingNotifier::default()).await;

        seed_alert(
            &h.storage,
            "ada@example.com",
            "london",
            AlertCondition::TempGt,
            Threshold::Numeric(20.0),
        )
        .await;
        seed_alert(
            &h.storage,
            "bea@example.com",
            "London",
            AlertCondition::TempGt,
            Threshold::Numeric(15.0),
        )
        .await;

        let summary = h.runner.run_once().await.unwrap();

        assert_eq!(summary.alerts_checked, 2);
        assert_eq!(summary.cities, 1);
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(summary.notified, 2);
        assert_eq!(h.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn failed_city_does_not_abort_the_others() {
        let provider = ScriptedProvider::new()
            .with_snapshot("london", snapshot("london", 25.0, "sunny"))
            .with_failure("paris");
        let h = harness(provider, RecordingNotifier::default()).await;

        let london_alert = seed_alert(
            &h.storage,
            "ada@example.com",
            "london",
            AlertCondition::TempGt,
            Threshold::Numeric(20.0),
        )
        .await;
        let paris_alert = seed_alert(
            &h.storage,
            "bea@example.com",
            "paris",
            AlertCondition::TempGt,
            Threshold::Numeric(20.0),
        )
        .await;

        let summary = h.runner.run_once().await.unwrap();

        assert_eq!(summary.cities, 2);
        assert_eq!(summary.cities_failed, 1);
        assert_eq!(summary.notified, 1);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ada@example.com");

        // The failed city's alert keeps its state for the next run
        let paris = h.storage.get_alert(paris_alert).await.unwrap().unwrap();
        assert!(paris.last_notified.is_none());
        assert!(paris.is_enabled);
        let london = h.storage.get_alert(london_alert).await.unwrap().unwrap();
        assert!(london.last_notified.is_some());
    }

    #[tokio::test]
    async fn unknown_city_skips_its_alerts() {
        let provider = ScriptedProvider::new();
        let h = harness(provider, RecordingNotifier::default()).await;
        seed_alert(
            &h.storage,
            "ada@example.com",
            "atlantis",
            AlertCondition::TempGt,
            Threshold::Numeric(20.0),
        )
        .await;

        let summary = h.runner.run_once().await.unwrap();

        assert_eq!(summary.cities_failed, 1);
        assert_eq!(summary.notified, 0);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_leaves_last_notified_for_retry() {
        let provider =
            ScriptedProvider::new().with_snapshot("london", snapshot("london", 25.0, "sunny"));
        let h = harness(provider, RecordingNotifier::failing()).await;
        let alert_id = seed_alert(
            &h.storage,
            "ada@example.com",
            "london",
            AlertCondition::TempGt,
            Threshold::Numeric(20.0),
        )
        .await;

        let summary = h.runner.run_once().await.unwrap();

        assert_eq!(summary.triggered, 1);
        assert_eq!(summary.notified, 0);
        assert_eq!(summary.notify_failed, 1);

        let alert = h.storage.get_alert(alert_id).await.unwrap().unwrap();
        assert!(alert.last_notified.is_none());
    }

    #[tokio::test]
    async fn renotifies_every_run_without_cooldown() {
        let provider =
            ScriptedProvider::new().with_snapshot("london", snapshot("london", 25.0, "sunny"));
        let h = harness(provider, RecordingNotifier::default()).await;
        seed_alert(
            &h.storage,
            "ada@example.com",
            "london",
            AlertCondition::TempGt,
            Threshold::Numeric(20.0),
        )
        .await;

        h.runner.run_once().await.unwrap();
        let second = h.runner.run_once().await.unwrap();

        assert_eq!(second.notified, 1);
        assert_eq!(h.notifier.sent().len(), 2);
        // The second run was served from cache
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_notifications() {
        let provider =
            ScriptedProvider::new().with_snapshot("london", snapshot("london", 25.0, "sunny"));
        let h = harness_with_cooldown(
            provider,
            RecordingNotifier::default(),
            Some(Duration::from_secs(3600)),
        )
        .await;
        seed_alert(
            &h.storage,
            "ada@example.com",
            "london",
            AlertCondition::TempGt,
            Threshold::Numeric(20.0),
        )
        .await;

        let first = h.runner.run_once().await.unwrap();
        let second = h.runner.run_once().await.unwrap();

        assert_eq!(first.notified, 1);
        assert_eq!(second.triggered, 1);
        assert_eq!(second.suppressed, 1);
        assert_eq!(second.notified, 0);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_runs_send_exactly_one_notification() {
        let provider = ScriptedProvider::new()
            .with_snapshot("london", snapshot("london", 25.0, "sunny"))
            .with_delay(Duration::from_millis(100));
        let h = harness(provider, RecordingNotifier::default()).await;
        seed_alert(
            &h.storage,
            "ada@example.com",
            "london",
            AlertCondition::TempGt,
            Threshold::Numeric(20.0),
        )
        .await;

        let runner = Arc::clone(&h.runner);
        let first = tokio::spawn(async move { runner.run_once().await });
        // Give the first run time to take the guard and enter its fetch
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = h.runner.run_once().await;

        assert!(second.is_none(), "overlapping trigger should be skipped");
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.notified, 1);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn dangling_alert_does_not_fail_the_run() {
        let provider =
            ScriptedProvider::new().with_snapshot("london", snapshot("london", 25.0, "sunny"));
        let h = harness(provider, RecordingNotifier::default()).await;

        let user_id = h.storage.insert_user("Ada", "ada@example.com").await.unwrap();
        let location_id = h
            .storage
            .insert_location(user_id, "Home", "london", None, None)
            .await
            .unwrap();
        h.storage
            .insert_alert(
                user_id,
                location_id,
                AlertCondition::TempGt,
                Threshold::Numeric(20.0),
            )
            .await
            .unwrap();
        h.storage.delete_user(user_id).await.unwrap();

        let summary = h.runner.run_once().await.unwrap();

        assert_eq!(summary.alerts_checked, 0);
        assert!(h.notifier.sent().is_empty());
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn disabled_alert_is_not_evaluated() {
        let provider =
            ScriptedProvider::new().with_snapshot("london", snapshot("london", 25.0, "sunny"));
        let h = harness(provider, RecordingNotifier::default()).await;
        let alert_id = seed_alert(
            &h.storage,
            "ada@example.com",
            "london",
            AlertCondition::TempGt,
            Threshold::Numeric(20.0),
        )
        .await;
        h.storage.set_alert_enabled(alert_id, false).await.unwrap();

        let summary = h.runner.run_once().await.unwrap();

        assert_eq!(summary.alerts_checked, 0);
        assert_eq!(h.provider.calls(), 0);
        assert!(h.notifier.sent().is_empty());
    }

    #[test]
    fn boundary_alignment() {
        // 10 past the hour: 50 minutes to the next top of the hour
        assert_eq!(seconds_until_next_boundary(3600, 3600 * 100 + 600), 3000);
        // Exactly on the boundary waits a full interval
        assert_eq!(seconds_until_next_boundary(3600, 3600 * 100), 3600);
        assert_eq!(seconds_until_next_boundary(60, 59), 1);
    }
}
