//! Stormwatch - threshold-based weather alerting with cached lookups and
//! snapshot history.
//!
//! # Overview
//!
//! Users save locations and configure alerts like "notify me when the
//! temperature in London goes above 30°C". On a fixed cadence the runner
//! loads every enabled alert, fetches current weather once per distinct
//! city (through a TTL cache), evaluates each alert's predicate against
//! the snapshot, notifies on matches, and appends historical snapshots
//! for saved locations.
//!
//! Signup, the REST CRUD layer, the frontend, and the concrete email
//! transport are separate services; this crate is the pipeline they call
//! into.
//!
//! # Modules
//!
//! - [`model`]: domain value types (snapshots, alerts, thresholds, history)
//! - [`cache`]: in-process TTL cache of snapshots per city
//! - [`provider`]: weather provider trait and OpenWeather client
//! - [`weather`]: cache + provider composition with history persistence
//! - [`storage`]: SQLite storage layer
//! - [`alerts`]: pure condition evaluation and notification formatting
//! - [`notifier`]: notification delivery seam
//! - [`runner`]: the periodic alert-check batch
//! - [`config`]: environment-driven configuration
//! - [`api`]: operational HTTP endpoints
//! - [`error`]: lookup error taxonomy

pub mod alerts;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod notifier;
pub mod provider;
pub mod runner;
pub mod storage;
pub mod weather;
