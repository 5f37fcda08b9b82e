//! Operational HTTP surface.
//!
//! The product REST layer (location/alert CRUD, weather views) lives in a
//! separate service and calls into this crate; the only endpoint exposed
//! here is a liveness probe for deployment tooling.

use axum::{Router, extract::State, http::StatusCode, routing::get};
use tracing::warn;

use crate::storage::Storage;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
}

/// Build the operational router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

/// GET /health - liveness check, including database reachability.
pub async fn health_check(State(state): State<AppState>) -> StatusCode {
    match state.storage.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
