//! HTTP surface of the mirror, driven through axum-test against a mock origin.

use axum::http::StatusCode;
use mirror_metadata::RecordDelta;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod common;
use common::{create_test_setup, origin_path, TestSetup, PUBLIC_URL};

const FOO_BYTES: &[u8] = b"foo-1.0.0 tarball bytes";

#[tokio::test]
async fn test_download_miss_then_hit() {
    let setup = create_test_setup().await.unwrap();
    Mock::given(method("GET"))
        .and(path(origin_path("foo", "1.0.0")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(FOO_BYTES.to_vec()))
        .expect(1)
        .mount(&setup.origin)
        .await;

    let response = setup.server.get("/api/v1/crates/foo/1.0.0/download").await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "application/x-tar");
    assert_eq!(response.as_bytes().as_ref(), FOO_BYTES);
    assert!(setup.store().exists(&TestSetup::key("foo", "1.0.0")).await);

    // Served from disk; the origin expectation above allows a single call.
    let response = setup.server.get("/api/v1/crates/foo/1.0.0/download").await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "application/x-tar");
    assert_eq!(response.as_bytes().as_ref(), FOO_BYTES);

    let status: Value = setup.server.get("/status").await.json();
    assert_eq!(status["total"], 1);
    assert_eq!(status["downloaded"], 1);
}

#[tokio::test]
async fn test_invalid_names_are_rejected_before_any_lookup() {
    let setup = create_test_setup().await.unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(FOO_BYTES.to_vec()))
        .expect(0)
        .mount(&setup.origin)
        .await;

    for url in [
        "/api/v1/crates/-foo/1.0.0/download",
        "/api/v1/crates/foo.bar/1.0.0/download",
        "/api/v1/crates/foo/1.0.0%2F..%2F..%2Fetc/download",
    ] {
        let response = setup.server.get(url).expect_failure().await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["code"], "validation_error", "{url}");
    }
}

#[tokio::test]
async fn test_forbidden_crate_is_refused() {
    let setup = create_test_setup().await.unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(FOO_BYTES.to_vec()))
        .expect(0)
        .mount(&setup.origin)
        .await;
    setup
        .app_state
        .metadata
        .upsert_record(&RecordDelta::new(TestSetup::key("foo", "1.0.0")).with_forbidden(true))
        .await
        .unwrap();

    let response = setup
        .server
        .get("/api/v1/crates/foo/1.0.0/download")
        .expect_failure()
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["code"], "forbidden");
}

#[tokio::test]
async fn test_origin_error_payload_is_not_found() {
    let setup = create_test_setup().await.unwrap();
    Mock::given(method("GET"))
        .and(path(origin_path("bar", "9.9.9")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"errors": [{"detail": "Not Found"}]})),
        )
        .mount(&setup.origin)
        .await;

    let response = setup
        .server
        .get("/api/v1/crates/bar/9.9.9/download")
        .expect_failure()
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "not_found");
    assert!(!setup.store().exists(&TestSetup::key("bar", "9.9.9")).await);
}

#[tokio::test]
async fn test_origin_status_is_passed_through() {
    let setup = create_test_setup().await.unwrap();
    Mock::given(method("GET"))
        .and(path(origin_path("foo", "1.0.0")))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&setup.origin)
        .await;

    let response = setup
        .server
        .get("/api/v1/crates/foo/1.0.0/download")
        .expect_failure()
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["code"], "origin_error");

    let status: Value = setup.server.get("/status").await.json();
    assert_eq!(status["total"], 0);
}

#[tokio::test]
async fn test_health() {
    let setup = create_test_setup().await.unwrap();

    let response = setup.server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_status_reports_counts_and_last_commit() {
    let setup = create_test_setup().await.unwrap();
    let metadata = &setup.app_state.metadata;
    metadata
        .upsert_record(&RecordDelta::new(TestSetup::key("foo", "1.0.0")).with_yanked(true))
        .await
        .unwrap();
    metadata
        .upsert_record(&RecordDelta::new(TestSetup::key("bar", "0.2.0")))
        .await
        .unwrap();
    metadata
        .record_history_entry("abc123", chrono::Utc::now())
        .await
        .unwrap();

    let response = setup.server.get("/status").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["total"], 2);
    assert_eq!(body["downloaded"], 0);
    assert_eq!(body["yanked"], 1);
    assert_eq!(body["forbidden"], 0);
    assert_eq!(body["last_commit"], "abc123");
    assert_eq!(body["in_flight"], 0);
}

#[tokio::test]
async fn test_index_config_points_at_mirror() {
    let setup = create_test_setup().await.unwrap();

    let response = setup.server.get("/index/config.json").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["dl"], format!("{PUBLIC_URL}/api/v1/crates"));
    assert_eq!(body["api"], "https://crates.io");
}
