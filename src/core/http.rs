//! HTTP client utilities.
//!
//! Builds the shared `reqwest` client and turns transport failures and error
//! responses into [`DaylineError`] values with the right fallback semantics.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;

use crate::error::{DaylineError, Result};

/// Default timeout for HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest slice of a non-JSON error body kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(format!("dayline/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DaylineError::Network(e.to_string()))
}

/// Join a base URL and an absolute or relative path.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Map a failed `send()` to a transport error.
#[must_use]
pub fn classify_send_error(err: &reqwest::Error, timeout: Duration) -> DaylineError {
    if err.is_timeout() {
        DaylineError::Timeout(timeout.as_secs())
    } else {
        DaylineError::Network(err.to_string())
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    /// Read status and body from a `reqwest` response.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the body cannot be read.
    pub async fn read(response: reqwest::Response, timeout: Duration) -> Result<Self> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| classify_send_error(&e, timeout))?;
        Ok(Self { status, body })
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Decode the body as JSON. An empty body decodes as JSON `null`.
    ///
    /// # Errors
    ///
    /// Returns [`DaylineError::ParseResponse`] on malformed JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        serde_json::from_str(body).map_err(|e| DaylineError::ParseResponse(e.to_string()))
    }

    /// Pass 2xx through, convert anything else to [`DaylineError::Remote`].
    ///
    /// # Errors
    ///
    /// Returns the server's error for non-success statuses.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(remote_error(self.status, &self.body))
        }
    }
}

/// Build a [`DaylineError::Remote`] from a status and error body.
///
/// Recognizes `{"error": {"code", "message"}}`, `{"error": "..."}`,
/// `{"message": "..."}` and `{"detail": "..."}`; anything else becomes a
/// truncated copy of the raw body.
#[must_use]
pub fn remote_error(status: u16, body: &str) -> DaylineError {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let (code, message) = parsed
        .as_ref()
        .and_then(extract_error_fields)
        .unwrap_or_else(|| (None, fallback_message(status, body)));

    DaylineError::Remote {
        status,
        code,
        message,
    }
}

fn extract_error_fields(value: &serde_json::Value) -> Option<(Option<String>, String)> {
    let text = |v: &serde_json::Value| v.as_str().map(str::to_string);

    if let Some(error) = value.get("error") {
        if let Some(message) = text(error) {
            return Some((None, message));
        }
        let message = error.get("message").and_then(text)?;
        let code = error.get("code").and_then(|c| {
            text(c).or_else(|| c.as_i64().map(|n| n.to_string()))
        });
        return Some((code, message));
    }

    let code = value.get("code").and_then(text);
    value
        .get("message")
        .or_else(|| value.get("detail"))
        .and_then(text)
        .map(|message| (code, message))
}

fn fallback_message(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("request failed")
            .to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("http://h/", "/a/b"), "http://h/a/b");
        assert_eq!(join_url("http://h", "a"), "http://h/a");
        assert_eq!(join_url("http://h", "https://other/x"), "https://other/x");
    }

    #[test]
    fn remote_error_nested_object() {
        let err = remote_error(422, r#"{"error": {"code": "INVALID", "message": "bad date"}}"#);
        match err {
            DaylineError::Remote {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 422);
                assert_eq!(code.as_deref(), Some("INVALID"));
                assert_eq!(message, "bad date");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn remote_error_flat_shapes() {
        let err = remote_error(400, r#"{"error": "nope"}"#);
        assert!(err.to_string().contains("nope"));

        let err = remote_error(404, r#"{"detail": "not found here"}"#);
        assert!(err.to_string().contains("not found here"));

        let err = remote_error(409, r#"{"code": "CONFLICT", "message": "exists"}"#);
        assert!(matches!(err, DaylineError::Remote { code: Some(ref c), .. } if c == "CONFLICT"));
    }

    #[test]
    fn remote_error_raw_body_is_truncated() {
        let body = "x".repeat(1000);
        let DaylineError::Remote { message, .. } = remote_error(500, &body) else {
            panic!("expected remote error");
        };
        assert_eq!(message.len(), MAX_ERROR_BODY_CHARS);
    }

    #[test]
    fn remote_error_empty_body_uses_reason() {
        let DaylineError::Remote { message, .. } = remote_error(503, "") else {
            panic!("expected remote error");
        };
        assert_eq!(message, "Service Unavailable");
    }

    #[test]
    fn api_response_json_and_status() {
        let ok = ApiResponse {
            status: 200,
            body: r#"{"count": 4}"#.to_string(),
        };
        let value: serde_json::Value = ok.json().unwrap();
        assert_eq!(value["count"], 4);

        let empty = ApiResponse {
            status: 204,
            body: String::new(),
        };
        assert!(empty.json::<Option<u32>>().unwrap().is_none());

        let bad = ApiResponse {
            status: 200,
            body: "<html>".to_string(),
        };
        assert!(matches!(
            bad.json::<serde_json::Value>(),
            Err(DaylineError::ParseResponse(_))
        ));

        let failed = ApiResponse {
            status: 500,
            body: "{}".to_string(),
        };
        assert!(failed.error_for_status().is_err());
    }
}
