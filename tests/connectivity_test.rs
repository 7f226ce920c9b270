//! Integration tests for the connectivity probe.

mod common;

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dayline::core::connectivity::{OfflineDetector, probe_once, spawn_probe};
use dayline::core::http::build_client;
use dayline::make_test_layer;

use common::logger::TestLogger;

#[tokio::test]
async fn any_http_response_counts_as_online() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let http = build_client(Duration::from_secs(2)).unwrap();
    assert!(probe_once(&http, &format!("{}/health", server.uri())).await);
}

#[tokio::test]
async fn probe_loop_brings_detector_online() {
    let log = TestLogger::new("probe_loop_brings_detector_online");
    log.phase("setup");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let detector = OfflineDetector::new(false);
    let mut subscription = detector.subscribe();
    let http = build_client(Duration::from_secs(2)).unwrap();

    log.phase("execute");
    let probe = spawn_probe(
        detector.clone(),
        http,
        format!("{}/health", server.uri()),
        Duration::from_millis(50),
    );
    let change = tokio::time::timeout(Duration::from_secs(2), subscription.changed())
        .await
        .expect("probe should report a transition");
    probe.stop().await;

    log.phase("verify");
    assert_eq!(change, Some(false));
    assert!(!detector.is_offline());
    log.finish_ok();
}

#[tokio::test]
async fn layer_probe_marks_unreachable_backend_offline() {
    let layer = make_test_layer("http://127.0.0.1:9", "access-1", "refresh-1");
    let mut subscription = layer.detector().subscribe();

    // Probes at the poll interval of the test config.
    let probe = layer.start_connectivity_probe();
    let change = tokio::time::timeout(Duration::from_secs(3), subscription.changed())
        .await
        .expect("probe should report a transition");
    drop(probe);

    assert_eq!(change, Some(true));
    assert!(layer.detector().is_offline());
}
