//! HTTP server setup and route handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use mirror_index::{GitIndexHistory, IndexSyncer};
use mirror_metadata::MetadataStore;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::artifact_store::ArtifactStore;
use crate::config::Config;
use crate::coordinator::{ArtifactOutcome, FetchCoordinator};
use crate::error::AppResult;
use crate::state::{AppState, StatusResponse};
use crate::sync::start_sync_task;
use crate::upstream::UpstreamClient;
use crate::validation;

const CRATE_CONTENT_TYPE: &str = "application/x-tar";

/// Build the router over an already assembled state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/v1/crates/{name}/{version}/download",
            get(download_crate),
        )
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/index/config.json", get(index_config_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the stores and assemble the fetch coordinator from `config`.
pub async fn build_coordinator(config: &Config) -> Result<FetchCoordinator> {
    let metadata = MetadataStore::open(&config.storage.db_path)
        .await
        .with_context(|| {
            format!(
                "Failed to open metadata store at {}",
                config.storage.db_path.display()
            )
        })?;
    let origin = UpstreamClient::new(&config.upstream).context("Failed to create origin client")?;

    Ok(FetchCoordinator::new(
        ArtifactStore::new(&config.storage.cache_root),
        metadata,
        Arc::new(origin),
        config.upstream.verify_checksums,
    ))
}

/// Index syncer over the git mirror described by `config`.
pub fn build_syncer(config: &Config, metadata: MetadataStore) -> IndexSyncer<GitIndexHistory> {
    let mut history = GitIndexHistory::new(&config.upstream.index_url, &config.storage.index_dir);
    if config.sync.rewrite_config {
        history = history.with_config_rewrite(config.registry_config());
    }
    IndexSyncer::new(metadata, history)
}

/// Serve until ctrl-c or SIGTERM, then stop the sync task and close the
/// metadata store.
pub async fn run_server(config: Config) -> Result<()> {
    info!("Starting crates mirror");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid socket address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    tokio::fs::create_dir_all(&config.storage.cache_root)
        .await
        .with_context(|| {
            format!(
                "Failed to create cache root {}",
                config.storage.cache_root.display()
            )
        })?;
    info!(cache_root = %config.storage.cache_root.display(), "Using cache directory");

    let coordinator = build_coordinator(&config).await?;
    let metadata = coordinator.metadata().clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sync_task = if config.sync.enabled {
        let syncer = build_syncer(&config, metadata.clone());
        info!(
            index_dir = %config.storage.index_dir.display(),
            "Index sync task started (interval: {}s)", config.sync.interval_secs
        );
        Some(tokio::spawn(start_sync_task(
            syncer,
            config.sync.interval_secs,
            shutdown_rx,
        )))
    } else {
        info!("Index sync disabled");
        None
    };

    let state = Arc::new(AppState::new(coordinator, &config));
    let app = create_router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Received shutdown signal, stopping gracefully");
        })
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = sync_task {
        if let Err(e) = task.await {
            error!(error = %e, "Index sync task ended abnormally");
        }
    }

    metadata.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn download_crate(
    State(state): State<Arc<AppState>>,
    Path((name, version)): Path<(String, String)>,
) -> AppResult<Response> {
    let key = validation::artifact_key(&name, &version)?;

    let body = match state.coordinator.get_artifact(&key).await? {
        ArtifactOutcome::CacheHit(file) => Body::from_stream(ReaderStream::new(file)),
        ArtifactOutcome::Fetched(bytes) => Body::from(bytes),
    };

    Ok(([(header::CONTENT_TYPE, CRATE_CONTENT_TYPE)], body).into_response())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> AppResult<Json<StatusResponse>> {
    let stats = state.metadata.stats().await?;
    let last_commit = state.metadata.last_applied_commit().await?;

    Ok(Json(StatusResponse {
        status: "ok",
        service: "crates-mirror",
        version: env!("CARGO_PKG_VERSION"),
        total: stats.total,
        downloaded: stats.downloaded,
        yanked: stats.yanked,
        forbidden: stats.forbidden,
        last_commit,
        in_flight: state.coordinator.in_flight_count(),
    }))
}

async fn index_config_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry_config.clone())
}
