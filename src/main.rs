//! Stormwatch service binary.
//!
//! Wires the pipeline together: storage, cache, provider client, notifier,
//! and the alert runner on its schedule, plus the operational HTTP
//! endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use stormwatch::api::{self, AppState};
use stormwatch::cache::WeatherCache;
use stormwatch::config::Config;
use stormwatch::notifier::{LogNotifier, Notifier};
use stormwatch::provider::OpenWeatherClient;
use stormwatch::runner::AlertRunner;
use stormwatch::storage::Storage;
use stormwatch::weather::WeatherService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("stormwatch=info".parse()?))
        .init();

    let config = Config::from_env()?;
    info!(
        port = config.port,
        db_url = %config.database_url,
        check_interval_secs = config.check_interval.as_secs(),
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "starting stormwatch"
    );

    let storage = Storage::new(&config.database_url).await?;
    info!("database initialized");

    let provider = OpenWeatherClient::with_base_url(
        config.provider_api_key.clone(),
        config.provider_timeout,
        &config.provider_base_url,
    )?;
    let weather = WeatherService::new(
        WeatherCache::new(config.cache_ttl),
        Arc::new(provider),
        storage.clone(),
    );

    // The email transport is provided by a sibling service in production;
    // the log notifier keeps local runs observable.
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let runner = Arc::new(AlertRunner::new(
        storage.clone(),
        weather,
        notifier,
        config.max_concurrent_cities,
        config.notify_cooldown,
    ));

    let check_interval = config.check_interval;
    tokio::spawn({
        let runner = Arc::clone(&runner);
        async move { runner.run_every(check_interval).await }
    });
    info!(
        interval_secs = check_interval.as_secs(),
        "alert check scheduled"
    );

    let app = api::router(AppState { storage });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "stormwatch is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
