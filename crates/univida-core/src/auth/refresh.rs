//! Single-flight exchange of the refresh token for a new access token.
//!
//! The first caller spawns the exchange as its own task and parks a shared
//! handle to it; callers arriving while it runs attach to that handle instead
//! of starting their own. Everyone attached observes the same outcome, and the
//! exchange runs to completion even if every caller gives up waiting.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::hooks::EndReason;
use super::session::SessionManager;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token stored")]
    MissingToken,

    #[error("Refresh token rejected with status {0}")]
    Rejected(u16),

    #[error("Refresh request failed: {0}")]
    Network(String),

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("Session ended while the refresh was in flight")]
    SessionEnded,

    #[error("Refresh task did not complete: {0}")]
    TaskFailed(String),
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

/// Guards the refresh endpoint so at most one exchange runs at a time.
/// Clone is cheap and clones share the in-flight slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    client: reqwest::Client,
    refresh_url: Arc<str>,
    session: Arc<SessionManager>,
    in_flight: Arc<Mutex<Option<SharedRefresh>>>,
}

impl RefreshCoordinator {
    pub fn new(client: reqwest::Client, refresh_url: &str, session: Arc<SessionManager>) -> Self {
        Self {
            client,
            refresh_url: Arc::from(refresh_url),
            session,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// True while an exchange is running.
    pub fn is_refreshing(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Obtain a new access token, joining the running exchange if there is
    /// one.
    ///
    /// On success the new token is already stored in the session. On failure
    /// the session has been ended (with one notice) before any caller sees
    /// the error. Must be called within a tokio runtime.
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        let shared = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.as_ref() {
                Some(running) => {
                    debug!("Joining in-flight token refresh");
                    running.clone()
                }
                None => {
                    let started = self.spawn_exchange();
                    *in_flight = Some(started.clone());
                    started
                }
            }
        };

        shared.await
    }

    fn spawn_exchange(&self) -> SharedRefresh {
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(self.clone().run())
            .map(move |joined| {
                joined.unwrap_or_else(|e| {
                    // The task never reached the point where it vacates the slot
                    warn!(error = %e, "Token refresh task failed");
                    *in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
                    Err(RefreshError::TaskFailed(e.to_string()))
                })
            })
            .boxed()
            .shared()
    }

    async fn run(self) -> Result<String, RefreshError> {
        let result = self.exchange().await;
        // Vacate the slot before the shared result wakes the waiters, so the
        // next 401 after this point starts a fresh exchange.
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
        result
    }

    async fn exchange(&self) -> Result<String, RefreshError> {
        let (epoch, refresh_token) = self.session.refresh_credentials();
        let Some(refresh_token) = refresh_token else {
            warn!("Access token rejected and no refresh token stored");
            self.session.end_session_at(epoch, EndReason::RefreshMissing);
            return Err(RefreshError::MissingToken);
        };

        debug!(url = %self.refresh_url, "Refreshing access token");
        match self.request_access_token(&refresh_token).await {
            Ok(access) => {
                if self.session.store_refreshed_token(epoch, &access) {
                    info!("Access token refreshed");
                    Ok(access)
                } else {
                    Err(RefreshError::SessionEnded)
                }
            }
            Err(e) => {
                // A rejected token from a replaced session must not end its successor
                if !self.session.end_session_at(epoch, EndReason::RefreshFailed)
                    && self.session.epoch() != epoch
                {
                    debug!(error = %e, "Ignoring refresh failure for a replaced session");
                    return Err(RefreshError::SessionEnded);
                }
                warn!(error = %e, "Token refresh failed");
                Err(e)
            }
        }
    }

    async fn request_access_token(&self, refresh_token: &str) -> Result<String, RefreshError> {
        let response = self
            .client
            .post(&*self.refresh_url)
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Rejected(status.as_u16()));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
        if body.access.is_empty() {
            return Err(RefreshError::InvalidResponse("empty access token".to_string()));
        }
        Ok(body.access)
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_url", &self.refresh_url)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}
