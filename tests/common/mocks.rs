//! Wiremock mounts for the backend REST surface.
#![allow(dead_code)]

use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// `GET path` answers 200 with `body` when sent `token`.
pub async fn mount_get_ok(server: &MockServer, route: &str, token: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("authorization", bearer(token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// `GET path` answers 401 when sent `token`.
pub async fn mount_get_unauthorized(server: &MockServer, route: &str, token: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("authorization", bearer(token).as_str()))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "token expired"})),
        )
        .mount(server)
        .await;
}

/// `POST /auth/refresh` exchanging `old_refresh` for a new pair, expected
/// exactly `times` times. `delay` keeps the refresh window open.
pub async fn mount_refresh(
    server: &MockServer,
    old_refresh: &str,
    new_access: &str,
    new_refresh: &str,
    times: u64,
    delay: Duration,
) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refresh_token": old_refresh})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "access_token": new_access,
                    "refresh_token": new_refresh,
                }))
                .set_delay(delay),
        )
        .expect(times)
        .mount(server)
        .await;
}

/// `POST /auth/refresh` rejected with `status`.
pub async fn mount_refresh_rejected(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(status).set_body_json(json!({"error": "invalid_grant"})),
        )
        .expect(1)
        .mount(server)
        .await;
}

/// `GET /sync/status` answering `body` for any caller.
pub async fn mount_sync_status(server: &MockServer, body: Value) {
    Mock::given(method("GET"))
        .and(path("/sync/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}
