//! Courier: one typed JSON API client with a persistent session.
//!
//! ARCHITECTURE
//! ============
//! - [`client`]: the single chokepoint for outbound calls. Injects the auth
//!   header, serializes JSON, classifies failures.
//! - [`error`]: the closed error taxonomy and tolerant error-body parsing.
//! - [`session`]: token, refresh token and cached user over pluggable storage.
//! - [`retry`]: opt-in exponential back-off decorator.
//! - [`auth`]: login / logout / current-user flows on top of the client.
//! - [`config`]: typed settings, from code or `COURIER_*` env vars.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use courier::{ApiClient, ClientConfig, Session};
//!
//! let session = Arc::new(Session::file(".courier-session.json"));
//! let client = ApiClient::new(ClientConfig::from_env()?, session)?
//!     .with_unauthorized_hook(|err| eprintln!("signed out: {err}"));
//! let boards: serde_json::Value = client.get("/boards").await?;
//! # let _ = boards;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod retry;
pub mod session;

pub use auth::{AuthApi, AuthEndpoints, AuthError, Credentials, LoginResponse};
pub use client::{ApiClient, RequestOptions};
pub use config::{AuthScheme, ClientConfig, ConfigError, Timeouts};
pub use error::{ApiError, ErrorBody, ErrorCode, ErrorKind};
pub use retry::{RetryPolicy, with_retry, with_retry_when};
pub use session::{FileStorage, MemoryStorage, Session, SessionError, Storage};
