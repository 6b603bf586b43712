mod common;

use common::{index_config, write_html};
use axum::body::Body;
use axum::http::Request;
use indexmap::IndexMap;
use neon::config::{FetcherConfig, HeaderConfig, HeaderRuleConfig, ServerConfig};
use neon::fetcher::Fetcher;
use neon::server::build_server;
use std::sync::Arc;
use tower::util::ServiceExt;

fn empty_fetcher() -> Arc<Fetcher> {
    Arc::new(Fetcher::new(&FetcherConfig::default()).unwrap())
}

fn server_config_with_index(dir: &std::path::Path) -> ServerConfig {
    ServerConfig {
        index: Some(index_config(write_html(dir), None, vec![])),
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn responses_carry_server_and_correlation_headers() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _pool) = build_server(&server_config_with_index(dir.path()), empty_fetcher()).unwrap();

    let response = router
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("server").unwrap(),
        &format!("neon/{}", env!("CARGO_PKG_VERSION"))
    );
    assert!(response.headers().contains_key("x-correlation-id"));
}

#[tokio::test]
async fn existing_correlation_id_is_echoed() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _pool) = build_server(&server_config_with_index(dir.path()), empty_fetcher()).unwrap();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-correlation-id", "test-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers().get("x-correlation-id").unwrap(),
        "test-123"
    );
}

#[tokio::test]
async fn header_renderer_ops_applied_to_response() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = server_config_with_index(dir.path());
    let mut set = IndexMap::new();
    set.insert("X-Frame-Options".to_string(), "DENY".to_string());
    config.header = Some(HeaderConfig {
        rules: vec![HeaderRuleConfig {
            path: "^/".to_string(),
            set,
            add: IndexMap::new(),
            remove: Vec::new(),
            last: false,
        }],
    });
    let (router, _pool) = build_server(&config, empty_fetcher()).unwrap();

    let response = router
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
}

#[tokio::test]
async fn empty_chain_answers_404() {
    let config = ServerConfig::default();
    let (router, _pool) = build_server(&config, empty_fetcher()).unwrap();

    let response = router
        .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn index_body_served_through_the_frame() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _pool) = build_server(&server_config_with_index(dir.path()), empty_fetcher()).unwrap();

    let response = router
        .oneshot(Request::builder().uri("/spa").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], common::TEMPLATE_HTML.as_bytes());
}

#[tokio::test]
async fn access_log_records_requests() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("access.log");
    let mut config = server_config_with_index(dir.path());
    config.access_log = Some(log_path.clone());
    let (router, _pool) = build_server(&config, empty_fetcher()).unwrap();

    let _ = router
        .oneshot(Request::builder().uri("/logged").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(contents.lines().count(), 1);
    let line = contents.lines().next().unwrap();
    assert!(line.contains("GET /logged 200"), "line: {line}");
}
