//! API client for the Univida portal.
//!
//! Every request goes through `ApiClient::execute`, which records activity,
//! attaches the bearer token, and on a 401 replays the request once with a
//! refreshed access token.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{EndReason, Identity, RefreshCoordinator, SessionManager};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Base URL for the auth server (token issue and refresh)
pub const DEFAULT_AUTH_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Base URL for resource endpoints
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Token endpoint, relative to the auth base URL
const TOKEN_PATH: &str = "token/";

/// Refresh endpoint, relative to the auth base URL
const REFRESH_PATH: &str = "token/refresh/";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenPair {
    access: String,
    refresh: String,
}

/// Where the auth server and the resource API live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_base_url: String,
    pub auth_base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            auth_base_url: DEFAULT_AUTH_BASE_URL.to_string(),
        }
    }
}

impl Endpoints {
    pub fn new(api_base_url: impl Into<String>, auth_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            auth_base_url: auth_base_url.into(),
        }
    }

    pub fn token_url(&self) -> String {
        join_url(&self.auth_base_url, TOKEN_PATH)
    }

    pub fn refresh_url(&self) -> String {
        join_url(&self.auth_base_url, REFRESH_PATH)
    }

    /// Resolve a resource path against the API base. Absolute URLs pass
    /// through unchanged.
    pub fn api_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            join_url(&self.api_base_url, path)
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Authenticated client for the portal API.
/// Clone is cheap - clones share the connection pool, the session and the
/// refresh slot.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    endpoints: Arc<Endpoints>,
    session: Arc<SessionManager>,
    refresher: RefreshCoordinator,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(endpoints: Endpoints, session: Arc<SessionManager>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self::with_client(client, endpoints, session))
    }

    /// Create a client around an existing connection pool.
    pub fn with_client(client: Client, endpoints: Endpoints, session: Arc<SessionManager>) -> Self {
        let refresher =
            RefreshCoordinator::new(client.clone(), &endpoints.refresh_url(), Arc::clone(&session));
        Self {
            client,
            endpoints: Arc::new(endpoints),
            session,
            refresher,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Exchange credentials for a token pair and start a session.
    ///
    /// Returns the identity carried by the new access token. A token without
    /// a usable identity is refused and leaves no session behind.
    pub async fn login(&self, username: &str, password: &str) -> Result<Identity, ApiError> {
        let url = self.endpoints.token_url();
        debug!(%url, username, "Requesting token pair");

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
            return Err(ApiError::InvalidCredentials);
        }
        let response = Self::check_response(response).await?;

        let pair: TokenPair = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse token pair: {e}")))?;
        self.session.set_session(&pair.access, Some(&pair.refresh));

        match self.session.decode_identity() {
            Some(identity) => {
                info!(username = %identity.username, role = %identity.role, "Logged in");
                Ok(identity)
            }
            None => {
                self.session.clear_session();
                Err(ApiError::InvalidResponse(
                    "Access token carries no usable identity".to_string(),
                ))
            }
        }
    }

    /// End the session on the user's request. Returns false when there was
    /// no session to end.
    pub fn logout(&self) -> bool {
        self.session.end_session(EndReason::Logout)
    }

    /// Start building a request against the API base URL.
    pub fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, self.endpoints.api_url(path))
    }

    /// Send a request with the session's credentials.
    ///
    /// A 401 triggers one refresh (shared with any other request rejected at
    /// the same time) and one replay with the new token. The replay's
    /// response is returned as is, 401 included. Every other status passes
    /// through untouched.
    pub async fn execute(&self, mut request: Request) -> Result<Response, ApiError> {
        let replay = request.try_clone();
        let sent_token = self.authorize(&mut request)?;

        let response = self.client.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            self.session.record_activity();
            return Ok(response);
        }

        let Some(mut replay) = replay else {
            warn!(url = %response.url(), "Got 401 for a request that cannot be replayed");
            return Ok(response);
        };

        let token = self.token_for_replay(sent_token.as_deref()).await?;
        replay.headers_mut().insert(AUTHORIZATION, bearer(&token)?);
        debug!(url = %replay.url(), "Replaying request with refreshed token");

        let response = self.client.execute(replay).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            self.session.record_activity();
        }
        Ok(response)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = self.request(Method::GET, path).build()?;
        self.send_json(request, path).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.request(Method::POST, path).json(body).build()?;
        self.send_json(request, path).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.request(Method::PUT, path).json(body).build()?;
        self.send_json(request, path).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, path).build()?;
        Self::check_response(self.execute(request).await?).await?;
        Ok(())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: Request,
        path: &str,
    ) -> Result<T, ApiError> {
        let response = Self::check_response(self.execute(request).await?).await?;
        response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {path}: {e}"))
        })
    }

    /// Record activity and attach the access token, if any. Returns the token
    /// that was attached.
    fn authorize(&self, request: &mut Request) -> Result<Option<String>, ApiError> {
        self.session.record_activity();
        let token = self.session.access_token();
        if let Some(ref token) = token {
            request.headers_mut().insert(AUTHORIZATION, bearer(token)?);
        }
        Ok(token)
    }

    /// Token to replay a rejected request with.
    ///
    /// If a refresh finished while this request was in flight, the stored
    /// token already differs from the one sent and is used directly.
    async fn token_for_replay(&self, sent: Option<&str>) -> Result<String, ApiError> {
        if let Some(current) = self.session.access_token() {
            if sent != Some(current.as_str()) {
                debug!("Access token changed while the request was in flight");
                return Ok(current);
            }
        }
        Ok(self.refresher.refresh().await?)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("endpoints", &self.endpoints)
            .field("session", &self.session)
            .finish()
    }
}

fn bearer(token: &str) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let endpoints = Endpoints::new("https://api.example.com/api/", "https://auth.example.com/api");
        assert_eq!(endpoints.token_url(), "https://auth.example.com/api/token/");
        assert_eq!(
            endpoints.refresh_url(),
            "https://auth.example.com/api/token/refresh/"
        );
        assert_eq!(
            endpoints.api_url("/polizas/"),
            "https://api.example.com/api/polizas/"
        );
        assert_eq!(
            endpoints.api_url("https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_bearer_header() {
        let value = bearer("abc.def.ghi").unwrap();
        assert_eq!(value.to_str().unwrap(), "Bearer abc.def.ghi");
        assert!(value.is_sensitive());
        assert!(bearer("bad\ntoken").is_err());
    }
}
