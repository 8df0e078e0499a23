//! Generic JSON API client: the single chokepoint for outbound HTTP calls.
//!
//! SYSTEM CONTEXT
//! ==============
//! One client per API. It is parameterised by [`ClientConfig`] (base URL, auth
//! header scheme, timeouts) and shares an [`Arc<Session>`] with its caller.
//! Cloning is cheap: clones share the connection pool and the session.
//!
//! ERROR HANDLING
//! ==============
//! Every failure comes back as an [`ApiError`]. Nothing is swallowed. On a 401
//! the session is cleared *before* the error is returned, then the optional
//! unauthorized hook runs. Navigation (redirect to login, exit, prompt) is the
//! hook's business, not the client's.
//!
//! No retry happens here; wrap calls in [`crate::retry::with_retry`].

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use reqwest::Method;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ClientConfig, ConfigError};
use crate::error::{ApiError, ErrorKind};
use crate::session::Session;

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;

/// Header carrying a fresh UUID per outbound request.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

type UnauthorizedHook = Arc<dyn Fn(&ApiError) + Send + Sync>;

// =============================================================================
// REQUEST OPTIONS
// =============================================================================

/// Per-call extras: JSON body, headers, query pairs.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options carrying `body` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns an `UnknownError` if `body` cannot be represented as JSON.
    pub fn json<B: Serialize + ?Sized>(body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(ApiError::invalid_request)?;
        Ok(Self::new().with_body(value))
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    session: Arc<Session>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl ApiClient {
    /// # Errors
    ///
    /// Returns [`ConfigError::HttpClientBuild`] if the HTTP client cannot be
    /// constructed (e.g. TLS backend initialisation fails).
    pub fn new(config: ClientConfig, session: Arc<Session>) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeouts.request())
            .connect_timeout(config.timeouts.connect())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, config: Arc::new(config), session, on_unauthorized: None })
    }

    /// Run `hook` after every 401 teardown. The session is already empty when
    /// it runs.
    #[must_use]
    pub fn with_unauthorized_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ApiError) + Send + Sync + 'static,
    {
        self.on_unauthorized = Some(Arc::new(hook));
        self
    }

    /// A clone sharing the pool and session that does not run the
    /// unauthorized hook. The 401 teardown still happens.
    #[must_use]
    pub fn without_unauthorized_hook(&self) -> Self {
        Self { on_unauthorized: None, ..self.clone() }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send one request and decode the JSON response into `T`.
    ///
    /// An empty success body (e.g. 204) decodes as JSON `null`, so `()`,
    /// `Option<_>` and [`Value`] are valid targets.
    ///
    /// # Errors
    ///
    /// - `NetworkError` if no HTTP response was received.
    /// - The status-mapped kind for any non-2xx response. 401 also clears the
    ///   session first.
    /// - `UnknownError` if the request cannot be built or the success body
    ///   does not decode into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let url = self.url_for(endpoint);
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let mut builder = self
            .http
            .request(method.clone(), &url)
            .header(ACCEPT, "application/json")
            .header(REQUEST_ID_HEADER, request_id.to_string());
        if let Some(token) = self.session.token() {
            let auth = &self.config.auth;
            builder = builder.header(auth.header_name(), auth.header_value(&token));
        }
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => return Err(ApiError::invalid_request(e)),
            Err(e) => {
                warn!(%method, path = endpoint, %request_id, error = %e, "api request failed in transport");
                return Err(ApiError::network(e));
            }
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(%method, path = endpoint, status = status.as_u16(), elapsed_ms, %request_id, "api request");

        if !status.is_success() {
            // Error bodies are best-effort; an unreadable one still classifies.
            let text = response.text().await.unwrap_or_default();
            let err = ApiError::from_response(status.as_u16(), retry_after.as_deref(), &text);
            return Err(self.after_failure(err));
        }

        let text = response.text().await.map_err(ApiError::network)?;
        decode_body(status.as_u16(), &text)
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.request(Method::GET, endpoint, RequestOptions::new()).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, endpoint, RequestOptions::new()).await
    }

    pub async fn post<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, endpoint, RequestOptions::json(body)?).await
    }

    pub async fn put<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, endpoint, RequestOptions::json(body)?).await
    }

    pub async fn patch<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PATCH, endpoint, RequestOptions::json(body)?).await
    }

    /// Absolute URL for `endpoint`. Absolute http(s) endpoints pass through.
    #[must_use]
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_owned();
        }
        if endpoint.starts_with('/') {
            format!("{}{endpoint}", self.config.base_url)
        } else {
            format!("{}/{endpoint}", self.config.base_url)
        }
    }

    fn after_failure(&self, err: ApiError) -> ApiError {
        if err.kind() != ErrorKind::Unauthorized {
            return err;
        }

        if let Err(e) = self.session.clear() {
            warn!(error = %e, "failed to clear session after unauthorized response");
        }
        warn!(message = err.message(), "unauthorized response; session cleared");

        if let Some(hook) = &self.on_unauthorized {
            hook(&err);
        }
        err
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url)
            .field("auth", &self.config.auth)
            .field("session", &self.session)
            .field("has_unauthorized_hook", &self.on_unauthorized.is_some())
            .finish_non_exhaustive()
    }
}

fn decode_body<T: DeserializeOwned>(status: u16, text: &str) -> Result<T, ApiError> {
    let text = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(text).map_err(|e| ApiError::decode(status, e))
}
