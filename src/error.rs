//! Error taxonomy for outbound API calls.
//!
//! DESIGN
//! ======
//! Classification is pure: [`ErrorKind::from_status`] and
//! [`ApiError::from_response`] never touch the session. The client performs
//! the 401 teardown itself and only then hands the error back, so every
//! function in this module can be tested without a network or a store.
//!
//! ERROR BODIES
//! ============
//! One canonical schema, `{ error?, message?, detail?, code? }`. Variants seen
//! in the wild (nested `error` objects, `detail` validation lists, numeric
//! codes) are accepted as compatibility inputs and folded into it.

use std::fmt;

use serde_json::Value;

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

// =============================================================================
// ERROR CODE TRAIT
// =============================================================================

/// Grep-able code and retry hint shared by every error type in the crate.
pub trait ErrorCode {
    /// Stable machine-readable code, e.g. `"RATE_LIMITED"`.
    fn error_code(&self) -> &'static str;

    /// Whether repeating the same call may succeed.
    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// ERROR KIND
// =============================================================================

/// Closed set of failure classes a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 401: the session is invalid or expired. Forces a logout.
    Unauthorized,
    /// 403: authenticated but not permitted. Never forces a logout.
    Forbidden,
    /// 404.
    NotFound,
    /// 429: carries the `Retry-After` hint when the server sent one.
    RateLimited,
    /// 500, 502, 503, 504.
    ServerError,
    /// The request never produced an HTTP response.
    NetworkError,
    /// Anything else, including undecodable success bodies.
    UnknownError,
}

impl ErrorKind {
    /// Map an HTTP status code onto the taxonomy.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            429 => Self::RateLimited,
            500 | 502 | 503 | 504 => Self::ServerError,
            _ => Self::UnknownError,
        }
    }

    /// Stable upper-case code for logs and CLI output.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::ServerError => "SERVER_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub fn retryable(self) -> bool {
        matches!(self, Self::ServerError | Self::NetworkError | Self::RateLimited)
    }

    fn fallback_message(self, status: Option<u16>) -> String {
        match (self, status) {
            (Self::Unauthorized, _) => "authentication required".to_owned(),
            (Self::Forbidden, _) => "permission denied".to_owned(),
            (Self::NotFound, _) => "resource not found".to_owned(),
            (Self::RateLimited, _) => "too many requests".to_owned(),
            (Self::ServerError, Some(status)) => format!("server error (status {status})"),
            (Self::ServerError, None) => "server error".to_owned(),
            (Self::NetworkError, _) => "network error".to_owned(),
            (Self::UnknownError, Some(status)) => format!("request failed with status {status}"),
            (Self::UnknownError, None) => "unexpected error".to_owned(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// ERROR BODY
// =============================================================================

/// Tolerantly parsed server error payload.
///
/// Any subset of fields may be present. A body that is not a JSON object
/// parses as [`ErrorBody::default`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
    pub detail: Option<String>,
    pub code: Option<String>,
}

impl ErrorBody {
    /// Parse raw response text. Never fails.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) else {
            return Self::default();
        };

        let mut body = Self {
            message: map.get("message").and_then(scalar_text),
            code: map.get("code").and_then(scalar_text),
            ..Self::default()
        };

        match map.get("error") {
            Some(Value::Object(nested)) => {
                body.error = nested.get("message").and_then(scalar_text);
                if body.code.is_none() {
                    body.code = nested.get("code").and_then(scalar_text);
                }
            }
            Some(other) => body.error = scalar_text(other),
            None => {}
        }

        body.detail = match map.get("detail") {
            Some(Value::Array(items)) => {
                let parts: Vec<String> = items
                    .iter()
                    .filter_map(|item| match item {
                        Value::Object(entry) => entry.get("msg").and_then(scalar_text),
                        other => scalar_text(other),
                    })
                    .collect();
                if parts.is_empty() { None } else { Some(parts.join("; ")) }
            }
            Some(other) => scalar_text(other),
            None => None,
        };

        body
    }

    /// The most specific human-readable message: `message`, then `error`,
    /// then `detail`.
    #[must_use]
    pub fn best_message(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .or(self.detail.as_deref())
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() { None } else { Some(trimmed.to_owned()) }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// API ERROR
// =============================================================================

/// A classified API failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    code: Option<String>,
    retry_after: Option<String>,
}

impl ApiError {
    /// Build an error from a non-success HTTP response.
    ///
    /// `retry_after` is the raw `Retry-After` header value. For 429 responses
    /// it is appended to the message verbatim.
    #[must_use]
    pub fn from_response(status: u16, retry_after: Option<&str>, body_text: &str) -> Self {
        let kind = ErrorKind::from_status(status);
        let body = ErrorBody::parse(body_text);
        let mut message = body
            .best_message()
            .map_or_else(|| kind.fallback_message(Some(status)), ToOwned::to_owned);

        let retry_after = retry_after
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToOwned::to_owned);
        if kind == ErrorKind::RateLimited {
            if let Some(value) = &retry_after {
                message = format!("{message} (retry after {value})");
            }
        }

        Self { kind, message, status: Some(status), code: body.code, retry_after }
    }

    /// Transport-level failure: DNS, refused connection, timeout, broken body.
    #[must_use]
    pub fn network(detail: impl fmt::Display) -> Self {
        Self::bare(ErrorKind::NetworkError, format!("network error: {detail}"), None)
    }

    /// A success response whose body does not match the expected type.
    #[must_use]
    pub fn decode(status: u16, detail: impl fmt::Display) -> Self {
        Self::bare(ErrorKind::UnknownError, format!("invalid response body: {detail}"), Some(status))
    }

    /// A request that could not be built: bad header, unserializable body.
    #[must_use]
    pub fn invalid_request(detail: impl fmt::Display) -> Self {
        Self::bare(ErrorKind::UnknownError, format!("invalid request: {detail}"), None)
    }

    /// An error of `kind` with the taxonomy's default wording.
    #[must_use]
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::bare(kind, kind.fallback_message(None), None)
    }

    fn bare(kind: ErrorKind, message: String, status: Option<u16>) -> Self {
        Self { kind, message, status, code: None, retry_after: None }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status, absent for network failures.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Server-supplied `code` field, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        self.retry_after.as_deref()
    }

    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl ErrorCode for ApiError {
    fn error_code(&self) -> &'static str {
        self.kind.code()
    }

    fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}
