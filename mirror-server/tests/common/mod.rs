//! Shared setup for the server's integration tests.

#![allow(dead_code)]

use anyhow::Result;
use axum_test::TestServer;
use mirror_metadata::test_utils::create_test_store;
use mirror_metadata::ArtifactKey;
use mirror_server::config::{Config, UpstreamSettings};
use mirror_server::{create_router, AppState, ArtifactStore, FetchCoordinator, UpstreamClient};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::MockServer;

pub const PUBLIC_URL: &str = "http://mirror.test:8080";

/// Upstream settings pointing at a mock origin's crates.io-style route.
pub fn upstream_settings(origin: &MockServer) -> UpstreamSettings {
    UpstreamSettings {
        download_url: format!(
            "{}/api/v1/crates/{{crate}}/{{version}}/download",
            origin.uri()
        ),
        timeout_secs: 5,
        ..Default::default()
    }
}

/// Origin-side path for `name@version`.
pub fn origin_path(name: &str, version: &str) -> String {
    format!("/api/v1/crates/{name}/{version}/download")
}

pub struct TestSetup {
    pub temp_dir: TempDir,
    pub origin: MockServer,
    pub app_state: Arc<AppState>,
    pub server: TestServer,
}

impl TestSetup {
    pub fn store(&self) -> &ArtifactStore {
        self.app_state.coordinator.store()
    }

    pub fn key(name: &str, version: &str) -> ArtifactKey {
        ArtifactKey::new(name, version)
    }
}

/// Full router over an in-memory metadata store, a temporary cache root
/// and a fresh mock origin.
pub async fn create_test_setup() -> Result<TestSetup> {
    let temp_dir = TempDir::new()?;
    let origin = MockServer::start().await;

    let mut config = Config::default();
    config.storage.cache_root = temp_dir.path().join("crates");
    config.storage.db_path = temp_dir.path().join("crates.db");
    config.storage.index_dir = temp_dir.path().join("index");
    config.server.public_url = Some(PUBLIC_URL.to_string());
    config.upstream = upstream_settings(&origin);
    config.sync.enabled = false;

    let coordinator = FetchCoordinator::new(
        ArtifactStore::new(&config.storage.cache_root),
        create_test_store().await,
        Arc::new(UpstreamClient::new(&config.upstream)?),
        config.upstream.verify_checksums,
    );
    let app_state = Arc::new(AppState::new(coordinator, &config));
    let server = TestServer::new(create_router(app_state.clone()))?;

    Ok(TestSetup {
        temp_dir,
        origin,
        app_state,
        server,
    })
}
