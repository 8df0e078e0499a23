//! Session lifecycle endpoints: login, logout, current user, token refresh.
//!
//! SYSTEM CONTEXT
//! ==============
//! Thin layer over [`ApiClient`] that moves tokens and the cached user in and
//! out of the shared [`Session`](crate::session::Session). Login starts a
//! fresh session; logout always ends it, even when the server call fails.

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::error::{ApiError, ErrorCode};
use crate::session::SessionError;

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("no refresh token in session")]
    MissingRefreshToken,
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Api(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::MissingRefreshToken => "MISSING_REFRESH_TOKEN",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Api(e) if e.retryable())
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Token-bearing response from login and refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse<U> {
    #[serde(alias = "access_token")]
    pub token: String,
    pub refresh_token: Option<String>,
    pub user: Option<U>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MeResponse<U> {
    Wrapped { user: U },
    Bare(U),
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Endpoint paths, relative to the client's base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    pub login: String,
    pub logout: String,
    pub me: String,
    pub refresh: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_owned(),
            logout: "/auth/logout".to_owned(),
            me: "/auth/me".to_owned(),
            refresh: "/auth/refresh".to_owned(),
        }
    }
}

// =============================================================================
// AUTH API
// =============================================================================

#[derive(Debug, Clone)]
pub struct AuthApi {
    client: ApiClient,
    endpoints: AuthEndpoints,
}

impl AuthApi {
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self::with_endpoints(client, AuthEndpoints::default())
    }

    #[must_use]
    pub fn with_endpoints(client: ApiClient, endpoints: AuthEndpoints) -> Self {
        Self { client, endpoints }
    }

    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// `POST` credentials and start a new session from the response.
    ///
    /// Any previous session is discarded first.
    ///
    /// # Errors
    ///
    /// Returns the API error on a failed login, or a session error if the
    /// new tokens cannot be stored.
    pub async fn login<U>(&self, credentials: &Credentials) -> Result<LoginResponse<U>, AuthError>
    where
        U: Serialize + DeserializeOwned,
    {
        let response: LoginResponse<U> = self.client.post(&self.endpoints.login, credentials).await?;

        let session = self.client.session();
        session.clear()?;
        session.set_token(Some(&response.token))?;
        session.set_refresh_token(response.refresh_token.as_deref())?;
        session.set_current_user(response.user.as_ref())?;

        info!(email = %credentials.email, has_user = response.user.is_some(), "login succeeded");
        Ok(response)
    }

    /// Tell the server, then clear the session regardless of the outcome.
    ///
    /// A 401 from the server means the session was already gone; the
    /// unauthorized hook does not run for it.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local session cannot be cleared.
    pub async fn logout(&self) -> Result<(), SessionError> {
        if self.client.session().is_authenticated() {
            let result = self
                .client
                .without_unauthorized_hook()
                .post::<_, IgnoredAny>(&self.endpoints.logout, &serde_json::json!({}))
                .await;
            if let Err(e) = result {
                warn!(error = %e, kind = %e.kind(), "logout request failed; clearing local session anyway");
            }
        }
        self.client.session().clear()
    }

    /// `GET` the authenticated user and refresh the cache.
    ///
    /// Accepts both `{ "user": {...} }` and a bare user object.
    ///
    /// # Errors
    ///
    /// Returns the API error (401 has already cleared the session), or a
    /// session error if the user cannot be cached.
    pub async fn fetch_current_user<U>(&self) -> Result<U, AuthError>
    where
        U: Serialize + DeserializeOwned,
    {
        let user = match self.client.get::<MeResponse<U>>(&self.endpoints.me).await? {
            MeResponse::Wrapped { user } | MeResponse::Bare(user) => user,
        };
        self.client.session().set_current_user(Some(&user))?;
        Ok(user)
    }

    /// The cached user, without a network call.
    #[must_use]
    pub fn cached_user<U: DeserializeOwned>(&self) -> Option<U> {
        self.client.session().current_user()
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// The refresh token is replaced only if the server issued a new one.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingRefreshToken`] when there is nothing to
    /// exchange, or the API/session error otherwise.
    pub async fn refresh<U>(&self) -> Result<LoginResponse<U>, AuthError>
    where
        U: Serialize + DeserializeOwned,
    {
        let session = self.client.session();
        let refresh_token = session.refresh_token().ok_or(AuthError::MissingRefreshToken)?;

        let body = RefreshRequest { refresh_token: &refresh_token };
        let response: LoginResponse<U> = self.client.post(&self.endpoints.refresh, &body).await?;

        session.set_token(Some(&response.token))?;
        if let Some(next) = response.refresh_token.as_deref() {
            session.set_refresh_token(Some(next))?;
        }
        if let Some(user) = &response.user {
            session.set_current_user(Some(user))?;
        }
        Ok(response)
    }
}
