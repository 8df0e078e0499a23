//! Client configuration parsed from environment variables.

use std::time::Duration;

use reqwest::header::HeaderName;

use crate::error::ErrorCode;
use crate::retry::{DEFAULT_RETRIES, DEFAULT_RETRY_BASE_MS, RetryPolicy};

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: env var {0} not set")]
    Missing(&'static str),
    #[error("invalid base URL '{0}' (expected http:// or https://)")]
    InvalidBaseUrl(String),
    #[error("invalid auth header name '{0}'")]
    InvalidHeader(String),
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing(_) => "CONFIG_MISSING",
            Self::InvalidBaseUrl(_) => "CONFIG_BASE_URL",
            Self::InvalidHeader(_) => "CONFIG_HEADER",
            Self::HttpClientBuild(_) => "CONFIG_HTTP_CLIENT",
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// How the session token is attached to outbound requests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`.
    #[default]
    Bearer,
    /// `<name>: <token>`, for APIs that use e.g. `X-Api-Key`.
    Header(String),
}

impl AuthScheme {
    /// Custom-header scheme with a validated header name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHeader`] if `name` is not a legal header name.
    pub fn header(name: &str) -> Result<Self, ConfigError> {
        let name = name.trim();
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(ConfigError::InvalidHeader(name.to_owned()));
        }
        if name.eq_ignore_ascii_case("authorization") {
            return Ok(Self::Bearer);
        }
        Ok(Self::Header(name.to_owned()))
    }

    #[must_use]
    pub fn header_name(&self) -> &str {
        match self {
            Self::Bearer => "authorization",
            Self::Header(name) => name,
        }
    }

    #[must_use]
    pub fn header_value(&self, token: &str) -> String {
        match self {
            Self::Bearer => format!("Bearer {token}"),
            Self::Header(_) => token.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Timeouts {
    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Scheme + host (+ optional path prefix), without a trailing `/`.
    pub base_url: String,
    pub auth: AuthScheme,
    pub user_agent: String,
    pub timeouts: Timeouts,
    /// Policy for callers that wrap requests in [`crate::retry::with_retry`].
    pub retry: RetryPolicy,
}

impl ClientConfig {
    /// Defaults for everything but the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] if `base_url` is not http(s).
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            auth: AuthScheme::Bearer,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
        })
    }

    /// Build typed client config from environment variables.
    ///
    /// Required:
    /// - `COURIER_BASE_URL`
    ///
    /// Optional:
    /// - `COURIER_AUTH_HEADER`: custom token header (default `Authorization: Bearer`)
    /// - `COURIER_USER_AGENT`
    /// - `COURIER_REQUEST_TIMEOUT_SECS`: default 30
    /// - `COURIER_CONNECT_TIMEOUT_SECS`: default 10
    /// - `COURIER_RETRIES`: default 3
    /// - `COURIER_RETRY_BASE_MS`: default 1000
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is missing or invalid, or the auth
    /// header name is not a legal header name.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("COURIER_BASE_URL").ok_or(ConfigError::Missing("COURIER_BASE_URL"))?;
        let mut config = Self::new(&base_url)?;

        if let Some(name) = lookup("COURIER_AUTH_HEADER").filter(|v| !v.trim().is_empty()) {
            config.auth = AuthScheme::header(&name)?;
        }
        if let Some(agent) = lookup("COURIER_USER_AGENT").filter(|v| !v.trim().is_empty()) {
            config.user_agent = agent;
        }
        config.timeouts = Timeouts {
            request_secs: parse_or(&lookup, "COURIER_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: parse_or(&lookup, "COURIER_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        config.retry = RetryPolicy::new(
            parse_or(&lookup, "COURIER_RETRIES", DEFAULT_RETRIES),
            Duration::from_millis(parse_or(&lookup, "COURIER_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS)),
        );

        Ok(config)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Trim whitespace and trailing slashes; require an http(s) scheme and host.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBaseUrl`] on anything else.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let host = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"));
    match host {
        Some(rest) if !rest.is_empty() => Ok(trimmed.to_owned()),
        _ => Err(ConfigError::InvalidBaseUrl(raw.to_owned())),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
