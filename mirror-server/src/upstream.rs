use crate::config::UpstreamSettings;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use axum::http::{header, HeaderMap, StatusCode};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use mirror_metadata::ArtifactKey;
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

/// Classified failure of a single origin fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// The origin answered with a structured error payload instead of an
    /// artifact, whatever the status code.
    #[error("not found at origin")]
    NotFound,

    #[error("origin returned {0}")]
    Status(StatusCode),

    /// The origin could not be reached or the transfer broke off.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Anything that can produce artifact bytes for a key.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, key: &ArtifactKey) -> Result<Bytes, UpstreamError>;
}

/// HTTP client for the origin registry's download endpoint.
pub struct UpstreamClient {
    client: Client,
    download_url: String,
    max_artifact_size: u64,
}

impl UpstreamClient {
    pub fn new(settings: &UpstreamSettings) -> AppResult<Self> {
        let probe = render_url(&settings.download_url, "probe", "0.0.0");
        Url::parse(&probe).map_err(|e| {
            AppError::Initialization(format!(
                "Invalid download URL template {}: {e}",
                settings.download_url
            ))
        })?;

        let client = Client::builder()
            .timeout(settings.timeout())
            .user_agent(concat!("crates-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Initialization(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            download_url: settings.download_url.clone(),
            max_artifact_size: settings.max_artifact_size,
        })
    }

    pub fn download_url(&self, key: &ArtifactKey) -> String {
        render_url(&self.download_url, key.name(), key.version())
    }

    fn too_large(&self, key: &ArtifactKey, size: u64) -> UpstreamError {
        warn!(artifact = %key, size, limit = self.max_artifact_size, "Artifact exceeds size limit");
        UpstreamError::Status(StatusCode::PAYLOAD_TOO_LARGE)
    }
}

#[async_trait]
impl Origin for UpstreamClient {
    async fn fetch(&self, key: &ArtifactKey) -> Result<Bytes, UpstreamError> {
        let url = self.download_url(key);
        debug!(url = %url, "Fetching artifact from origin");

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Origin unreachable");
            UpstreamError::Transport(e.to_string())
        })?;

        if is_error_payload(response.headers()) {
            debug!(artifact = %key, status = %response.status(), "Origin returned an error payload");
            return Err(UpstreamError::NotFound);
        }
        if response.status() != StatusCode::OK {
            return Err(UpstreamError::Status(response.status()));
        }
        if let Some(length) = response.content_length() {
            if length > self.max_artifact_size {
                return Err(self.too_large(key, length));
            }
        }

        let capacity = response
            .content_length()
            .map_or(0, |len| len as usize);
        let mut body = BytesMut::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UpstreamError::Transport(e.to_string()))?;
            let size = (body.len() + chunk.len()) as u64;
            if size > self.max_artifact_size {
                return Err(self.too_large(key, size));
            }
            body.extend_from_slice(&chunk);
        }

        info!(artifact = %key, size = body.len(), "Fetched artifact from origin");
        Ok(body.freeze())
    }
}

fn render_url(template: &str, name: &str, version: &str) -> String {
    template
        .replace("{crate}", name)
        .replace("{version}", version)
}

fn is_error_payload(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
}
