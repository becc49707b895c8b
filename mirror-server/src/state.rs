//! # Application State
//!
//! [`AppState`] is built once by [`crate::server::run_server`] (or by tests)
//! and shared with every handler behind an `Arc`.

use crate::config::Config;
use crate::coordinator::FetchCoordinator;
use mirror_index::RegistryConfig;
use mirror_metadata::MetadataStore;
use serde::Serialize;

#[derive(Clone)]
pub struct AppState {
    /// Single entry point for artifact requests.
    pub coordinator: FetchCoordinator,
    pub metadata: MetadataStore,
    /// Served at `/index/config.json`.
    pub registry_config: RegistryConfig,
}

impl AppState {
    pub fn new(coordinator: FetchCoordinator, config: &Config) -> Self {
        Self {
            metadata: coordinator.metadata().clone(),
            registry_config: config.registry_config(),
            coordinator,
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub total: i64,
    pub downloaded: i64,
    pub yanked: i64,
    pub forbidden: i64,
    pub last_commit: Option<String>,
    pub in_flight: usize,
}
