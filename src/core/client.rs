//! Authenticated request client.
//!
//! Every request carries the current bearer token. A 401 triggers at most one
//! refresh (shared with concurrent callers, see [`Session`]) followed by
//! exactly one retry; whatever the retry returns is final.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::http::{ApiResponse, build_client, classify_send_error, join_url};
use crate::core::session::{REFRESH_PATH, Session};
use crate::error::{DaylineError, Result};
use crate::storage::config::ResolvedConfig;
use crate::storage::credentials::CredentialStore;

const UNAUTHORIZED: u16 = 401;

/// Method and optional JSON body of a request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<serde_json::Value>,
}

impl RequestOptions {
    #[must_use]
    pub const fn get() -> Self {
        Self {
            method: Method::GET,
            body: None,
        }
    }

    #[must_use]
    pub const fn delete() -> Self {
        Self {
            method: Method::DELETE,
            body: None,
        }
    }

    #[must_use]
    pub fn post(body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
        }
    }

    #[must_use]
    pub fn patch(body: serde_json::Value) -> Self {
        Self {
            method: Method::PATCH,
            body: Some(body),
        }
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::get()
    }
}

/// HTTP client bound to one backend and one session.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: String,
    http: Client,
    timeout: Duration,
    session: Session,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("base_url", &self.inner.base_url)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

impl AuthClient {
    /// Client for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ResolvedConfig, credentials: CredentialStore) -> Result<Self> {
        Self::with_base_url(&config.base_url, credentials, config.timeout)
    }

    /// Client for an explicit base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_base_url(
        base_url: &str,
        credentials: CredentialStore,
        timeout: Duration,
    ) -> Result<Self> {
        let http = build_client(timeout)?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let session = Session::new(
            credentials,
            http.clone(),
            join_url(&base_url, REFRESH_PATH),
            timeout,
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                base_url,
                http,
                timeout,
                session,
            }),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        self.inner.session.credentials()
    }

    /// Underlying HTTP client, for unauthenticated calls such as health probes.
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.inner.http
    }

    /// Absolute URL for `path`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        join_url(&self.inner.base_url, path)
    }

    /// Send an authenticated request.
    ///
    /// # Errors
    ///
    /// - [`DaylineError::Unauthenticated`] if there is no session, or the
    ///   session could not be refreshed
    /// - [`DaylineError::Network`] / [`DaylineError::Timeout`] on transport failure
    /// - [`DaylineError::Remote`] for any other non-2xx response, including a
    ///   401 on the retried request
    pub async fn request(&self, path: &str, options: RequestOptions) -> Result<ApiResponse> {
        let credentials = self.credentials();
        let Some(token) = credentials.get_access_token() else {
            tracing::debug!(path, "No access token, refusing request");
            return Err(DaylineError::Unauthenticated);
        };

        let url = self.url(path);
        let first = self.send_once(&url, &options, &token).await?;
        if first.status != UNAUTHORIZED {
            return first.error_for_status();
        }

        tracing::debug!(path, "Access token rejected");

        let retry_token = match credentials.get_access_token() {
            Some(current) if current != token => {
                tracing::debug!(path, "Token already rotated, retrying");
                current
            }
            _ => match self.inner.session.refresh().await {
                Ok(pair) => pair.access_token,
                Err(e) if e.ends_session() => return Err(DaylineError::Unauthenticated),
                Err(e) => return Err(e.into()),
            },
        };

        let retry = self.send_once(&url, &options, &retry_token).await?;
        if retry.status == UNAUTHORIZED {
            tracing::warn!(path, "Request still unauthorized after refresh");
        }
        retry.error_for_status()
    }

    async fn send_once(
        &self,
        url: &str,
        options: &RequestOptions,
        token: &str,
    ) -> Result<ApiResponse> {
        let mut builder = self
            .inner
            .http
            .request(options.method.clone(), url)
            .bearer_auth(token);
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_send_error(&e, self.inner.timeout))?;
        let response = ApiResponse::read(response, self.inner.timeout).await?;

        tracing::debug!(
            method = %options.method,
            url,
            status = response.status,
            "Request completed"
        );
        Ok(response)
    }

    /// GET `path` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns request errors, or [`DaylineError::ParseResponse`] on a bad body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(path, RequestOptions::get()).await?.json()
    }

    /// Send `body` as JSON with `method` and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns request errors, or [`DaylineError::ParseResponse`] on a bad body.
    pub async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        let options = RequestOptions {
            method,
            body: Some(body),
        };
        self.request(path, options).await?.json()
    }
}
