//! Origin response classification against a mock registry.

use axum::http::StatusCode;
use mirror_metadata::ArtifactKey;
use mirror_server::config::UpstreamSettings;
use mirror_server::{Origin, UpstreamClient, UpstreamError};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{origin_path, upstream_settings};

async fn client_for(origin: &MockServer) -> UpstreamClient {
    UpstreamClient::new(&upstream_settings(origin)).unwrap()
}

#[tokio::test]
async fn test_binary_200_is_the_artifact() {
    let origin = MockServer::start().await;
    let content = b"\x1f\x8b crate tarball".to_vec();
    Mock::given(method("GET"))
        .and(path(origin_path("foo", "1.0.0")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-tar")
                .set_body_bytes(content.clone()),
        )
        .expect(1)
        .mount(&origin)
        .await;

    let bytes = client_for(&origin)
        .await
        .fetch(&ArtifactKey::new("foo", "1.0.0"))
        .await
        .unwrap();
    assert_eq!(bytes.to_vec(), content);
}

#[tokio::test]
async fn test_json_body_with_200_is_not_found() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(origin_path("bar", "9.9.9")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errors": [{"detail": "crate `bar` does not exist"}]})),
        )
        .mount(&origin)
        .await;

    let err = client_for(&origin)
        .await
        .fetch(&ArtifactKey::new("bar", "9.9.9"))
        .await
        .unwrap_err();
    assert_eq!(err, UpstreamError::NotFound);
}

#[tokio::test]
async fn test_json_body_with_404_is_not_found() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(origin_path("baz", "3.1.4")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
        .mount(&origin)
        .await;

    let err = client_for(&origin)
        .await
        .fetch(&ArtifactKey::new("baz", "3.1.4"))
        .await
        .unwrap_err();
    assert_eq!(err, UpstreamError::NotFound);
}

#[tokio::test]
async fn test_non_json_error_keeps_origin_status() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(origin_path("foo", "1.0.0")))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&origin)
        .await;

    let err = client_for(&origin)
        .await
        .fetch(&ArtifactKey::new("foo", "1.0.0"))
        .await
        .unwrap_err();
    assert_eq!(err, UpstreamError::Status(StatusCode::INTERNAL_SERVER_ERROR));
}

#[tokio::test]
async fn test_oversized_artifact_is_rejected() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(origin_path("huge", "1.0.0")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
        .mount(&origin)
        .await;

    let settings = UpstreamSettings {
        max_artifact_size: 1024,
        ..upstream_settings(&origin)
    };
    let err = UpstreamClient::new(&settings)
        .unwrap()
        .fetch(&ArtifactKey::new("huge", "1.0.0"))
        .await
        .unwrap_err();
    assert_eq!(err, UpstreamError::Status(StatusCode::PAYLOAD_TOO_LARGE));
}

#[tokio::test]
async fn test_unreachable_origin_is_a_transport_error() {
    let settings = UpstreamSettings {
        download_url: "http://127.0.0.1:1/api/v1/crates/{crate}/{version}/download".to_string(),
        timeout_secs: 2,
        ..Default::default()
    };
    let err = UpstreamClient::new(&settings)
        .unwrap()
        .fetch(&ArtifactKey::new("foo", "1.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::Transport(_)));
}
