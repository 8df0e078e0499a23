use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use courier::{
    ApiClient, ApiError, AuthApi, AuthError, AuthScheme, ClientConfig, ConfigError, Credentials, ErrorCode,
    RequestOptions, Session, SessionError, with_retry_when,
};
use reqwest::Method;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),
    #[error("invalid query pair '{0}' (expected key=value)")]
    InvalidQuery(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("not logged in; run `courier login` first")]
    NotLoggedIn,
}

impl ErrorCode for CliError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.error_code(),
            Self::Api(e) => e.error_code(),
            Self::Auth(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::InvalidMethod(_) => "INVALID_METHOD",
            Self::InvalidQuery(_) => "INVALID_QUERY",
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::NotLoggedIn => "NOT_LOGGED_IN",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "courier", about = "Typed JSON API client with a persistent session")]
struct Cli {
    #[arg(long, env = "COURIER_BASE_URL")]
    base_url: String,

    #[arg(long, env = "COURIER_SESSION_FILE", default_value = ".courier-session.json")]
    session_file: PathBuf,

    #[arg(long, env = "COURIER_AUTH_HEADER", help = "Send the token in this header instead of Authorization: Bearer")]
    auth_header: Option<String>,

    #[arg(long, env = "COURIER_RETRIES")]
    retries: Option<u32>,

    #[arg(long, env = "COURIER_RETRY_BASE_MS")]
    retry_base_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a session and store the returned tokens.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "COURIER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// End the session locally and on the server.
    Logout,
    /// Show the cached user, or fetch it with --refresh.
    Whoami {
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// Send an arbitrary request through the retry decorator.
    Request {
        method: String,
        path: String,
        #[arg(long, help = "JSON request body")]
        data: Option<String>,
        #[arg(long = "query", value_name = "KEY=VALUE")]
        query: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error [{}]: {e}", e.error_code());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = build_config(&cli)?;
    tracing::debug!(base_url = %config.base_url, session_file = %cli.session_file.display(), "courier cli starting");
    let session = Arc::new(Session::file(&cli.session_file));
    let client = ApiClient::new(config, session)?.with_unauthorized_hook(|_| {
        eprintln!("session expired; run `courier login` to sign in again");
    });

    match cli.command {
        Command::Login { email, password } => run_login(&client, &cli.session_file, email, password).await,
        Command::Logout => run_logout(&client, &cli.session_file).await,
        Command::Whoami { refresh } => run_whoami(&client, refresh).await,
        Command::Request { method, path, data, query } => {
            let method = parse_method(&method)?;
            let options = build_options(data.as_deref(), &query)?;
            run_request(&client, method, &path, options).await
        }
    }
}

fn build_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::from_lookup(|key| match key {
        "COURIER_BASE_URL" => Some(cli.base_url.clone()),
        other => std::env::var(other).ok(),
    })?;
    if let Some(name) = &cli.auth_header {
        config.auth = AuthScheme::header(name)?;
    }
    if let Some(retries) = cli.retries {
        config.retry.retries = retries;
    }
    if let Some(ms) = cli.retry_base_ms {
        config.retry.base_delay = Duration::from_millis(ms);
    }
    Ok(config)
}

async fn run_login(
    client: &ApiClient,
    session_file: &std::path::Path,
    email: String,
    password: String,
) -> Result<(), CliError> {
    let auth = AuthApi::new(client.clone());
    let response = auth.login::<Value>(&Credentials { email, password }).await?;
    match &response.user {
        Some(user) => {
            println!("Logged in");
            print_json(user)?;
        }
        None => println!("Logged in (server returned no user record)"),
    }
    println!("session stored at {}", session_file.display());
    Ok(())
}

async fn run_logout(client: &ApiClient, session_file: &std::path::Path) -> Result<(), CliError> {
    AuthApi::new(client.clone()).logout().await?;
    println!("Session cleared ({})", session_file.display());
    Ok(())
}

async fn run_whoami(client: &ApiClient, refresh: bool) -> Result<(), CliError> {
    let auth = AuthApi::new(client.clone());
    if refresh {
        let user = auth.fetch_current_user::<Value>().await?;
        return print_json(&user);
    }
    if !client.session().is_authenticated() {
        return Err(CliError::NotLoggedIn);
    }
    match auth.cached_user::<Value>() {
        Some(user) => print_json(&user),
        None => {
            println!("authenticated, no cached user; use --refresh to fetch it");
            Ok(())
        }
    }
}

async fn run_request(
    client: &ApiClient,
    method: Method,
    path: &str,
    options: RequestOptions,
) -> Result<(), CliError> {
    let value = send_with_retry(client, method, path, options).await?;
    print_json(&value)
}

/// Only transient failures (server, network, rate limit) are repeated. Auth
/// and client errors return on the first attempt.
async fn send_with_retry(
    client: &ApiClient,
    method: Method,
    path: &str,
    options: RequestOptions,
) -> Result<Value, ApiError> {
    let policy = client.config().retry;
    with_retry_when(policy, ApiError::retryable, || {
        client.request::<Value>(method.clone(), path, options.clone())
    })
    .await
}

fn parse_method(raw: &str) -> Result<Method, CliError> {
    let upper = raw.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return Err(CliError::InvalidMethod(raw.to_owned()));
    }
    Method::from_bytes(upper.as_bytes()).map_err(|_| CliError::InvalidMethod(raw.to_owned()))
}

fn build_options(data: Option<&str>, query: &[String]) -> Result<RequestOptions, CliError> {
    let mut options = RequestOptions::new();
    if let Some(raw) = data {
        options = options.with_body(serde_json::from_str::<Value>(raw)?);
    }
    for pair in query {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(CliError::InvalidQuery(pair.clone()));
        };
        if key.is_empty() {
            return Err(CliError::InvalidQuery(pair.clone()));
        }
        options = options.query(key, value);
    }
    Ok(options)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
