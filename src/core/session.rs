//! Session refresh coordination.
//!
//! A [`Session`] owns the credential store and the single in-flight refresh.
//! The first caller that needs a refresh starts it; everyone arriving while it
//! runs awaits the same shared future, so a burst of expired requests costs
//! exactly one call to the refresh endpoint.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::Client;
use serde_json::json;

use crate::core::http::classify_send_error;
use crate::error::DaylineError;
use crate::storage::credentials::{CredentialStore, TokenPair, fingerprint};

/// Path of the token refresh endpoint.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Why a refresh did not produce a new token pair.
///
/// Cloneable so a single outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// No refresh token stored.
    MissingToken,
    /// The endpoint answered with a non-success status.
    Rejected { status: u16 },
    /// The endpoint answered 2xx with an unusable body.
    InvalidResponse(String),
    /// No response was received.
    Network(String),
    /// No response within the timeout.
    Timeout(u64),
    /// The new pair could not be persisted.
    Storage(String),
}

impl RefreshError {
    /// Whether the stored session is unusable after this failure.
    #[must_use]
    pub const fn ends_session(&self) -> bool {
        matches!(
            self,
            Self::MissingToken | Self::Rejected { .. } | Self::InvalidResponse(_)
        )
    }
}

impl From<RefreshError> for DaylineError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::MissingToken => Self::MissingRefreshToken,
            RefreshError::Rejected { status } => Self::RefreshRejected { status },
            RefreshError::InvalidResponse(message) => Self::ParseResponse(message),
            RefreshError::Network(message) => Self::Network(message),
            RefreshError::Timeout(seconds) => Self::Timeout(seconds),
            RefreshError::Storage(message) => Self::Storage(message),
        }
    }
}

type RefreshOutcome = Result<TokenPair, RefreshError>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Credentials plus the pending-refresh slot for one signed-in user.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    credentials: CredentialStore,
    http: Client,
    refresh_url: String,
    timeout: Duration,
    pending: Mutex<Option<PendingRefresh>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("refresh_url", &self.inner.refresh_url)
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl Session {
    #[must_use]
    pub fn new(
        credentials: CredentialStore,
        http: Client,
        refresh_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                credentials,
                http,
                refresh_url: refresh_url.into(),
                timeout,
                pending: Mutex::new(None),
            }),
        }
    }

    /// The credential store backing this session.
    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    /// Whether a refresh is currently in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Obtain a new token pair, joining an in-flight refresh if one exists.
    ///
    /// On success the new pair is already stored. If the refresh endpoint
    /// rejects the token, or no refresh token exists, the session is cleared.
    ///
    /// # Errors
    ///
    /// Returns the shared [`RefreshError`] of the refresh attempt.
    pub async fn refresh(&self) -> Result<TokenPair, RefreshError> {
        let (shared, leader) = {
            let mut pending = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = pending.as_ref() {
                (existing.clone(), false)
            } else {
                let fresh = Self::perform_refresh(Arc::clone(&self.inner))
                    .boxed()
                    .shared();
                *pending = Some(fresh.clone());
                (fresh, true)
            }
        };

        if !leader {
            tracing::debug!("Joining in-flight session refresh");
        }

        let outcome = shared.clone().await;

        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending
            .as_ref()
            .is_some_and(|current| Shared::ptr_eq(current, &shared))
        {
            *pending = None;
        }
        drop(pending);

        outcome
    }

    async fn perform_refresh(inner: Arc<SessionInner>) -> RefreshOutcome {
        let outcome = Self::call_refresh_endpoint(&inner).await;

        match &outcome {
            Ok(pair) => {
                tracing::info!(access = %fingerprint(&pair.access_token), "Session refreshed");
            }
            Err(err) if err.ends_session() => {
                tracing::warn!(error = ?err, "Session refresh failed, signing out");
                if let Err(e) = inner.credentials.clear_tokens() {
                    tracing::warn!(error = %e, "Failed to clear rejected session");
                }
            }
            Err(err) => {
                tracing::warn!(error = ?err, "Session refresh did not complete, keeping session");
            }
        }

        outcome
    }

    async fn call_refresh_endpoint(inner: &SessionInner) -> RefreshOutcome {
        let Some(refresh_token) = inner.credentials.get_refresh_token() else {
            return Err(RefreshError::MissingToken);
        };

        tracing::debug!(refresh = %fingerprint(&refresh_token), "Requesting token refresh");

        let response = inner
            .http
            .post(&inner.refresh_url)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| match classify_send_error(&e, inner.timeout) {
                DaylineError::Timeout(seconds) => RefreshError::Timeout(seconds),
                other => RefreshError::Network(other.to_string()),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
            });
        }

        let pair: TokenPair = response
            .json()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        if pair.access_token.is_empty() || pair.refresh_token.is_empty() {
            return Err(RefreshError::InvalidResponse(
                "refresh response contained an empty token".to_string(),
            ));
        }

        inner
            .credentials
            .store_tokens(&pair.access_token, &pair.refresh_token)
            .map_err(|e| RefreshError::Storage(e.to_string()))?;

        Ok(pair)
    }
}
