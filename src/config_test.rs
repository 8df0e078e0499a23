use std::collections::HashMap;

use super::*;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn from_lookup_defaults() {
    let cfg = ClientConfig::from_lookup(lookup_from(&[("COURIER_BASE_URL", "https://api.example.test/")])).unwrap();
    assert_eq!(cfg.base_url, "https://api.example.test");
    assert_eq!(cfg.auth, AuthScheme::Bearer);
    assert_eq!(cfg.user_agent, DEFAULT_USER_AGENT);
    assert_eq!(cfg.timeouts, Timeouts::default());
    assert_eq!(cfg.retry, RetryPolicy::default());
}

#[test]
fn from_lookup_overrides() {
    let cfg = ClientConfig::from_lookup(lookup_from(&[
        ("COURIER_BASE_URL", "http://localhost:8080/api"),
        ("COURIER_AUTH_HEADER", "X-Api-Key"),
        ("COURIER_USER_AGENT", "admin-panel/2"),
        ("COURIER_REQUEST_TIMEOUT_SECS", "5"),
        ("COURIER_CONNECT_TIMEOUT_SECS", "2"),
        ("COURIER_RETRIES", "7"),
        ("COURIER_RETRY_BASE_MS", "250"),
    ]))
    .unwrap();
    assert_eq!(cfg.base_url, "http://localhost:8080/api");
    assert_eq!(cfg.auth, AuthScheme::Header("X-Api-Key".to_owned()));
    assert_eq!(cfg.user_agent, "admin-panel/2");
    assert_eq!(cfg.timeouts, Timeouts { request_secs: 5, connect_secs: 2 });
    assert_eq!(cfg.retry, RetryPolicy::new(7, Duration::from_millis(250)));
}

#[test]
fn unparseable_numbers_fall_back_to_defaults() {
    let cfg = ClientConfig::from_lookup(lookup_from(&[
        ("COURIER_BASE_URL", "https://api.example.test"),
        ("COURIER_REQUEST_TIMEOUT_SECS", "soon"),
        ("COURIER_RETRIES", "-1"),
    ]))
    .unwrap();
    assert_eq!(cfg.timeouts.request_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    assert_eq!(cfg.retry.retries, DEFAULT_RETRIES);
}

#[test]
fn missing_base_url_errors() {
    let err = ClientConfig::from_lookup(lookup_from(&[])).unwrap_err();
    assert_eq!(err, ConfigError::Missing("COURIER_BASE_URL"));
    assert_eq!(err.error_code(), "CONFIG_MISSING");
}

#[test]
fn invalid_auth_header_errors() {
    let err = ClientConfig::from_lookup(lookup_from(&[
        ("COURIER_BASE_URL", "https://api.example.test"),
        ("COURIER_AUTH_HEADER", "bad header"),
    ]))
    .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidHeader(_)));
}

#[test]
fn from_env_reads_process_environment() {
    unsafe {
        std::env::set_var("COURIER_BASE_URL", "https://env.example.test//");
        std::env::set_var("COURIER_RETRIES", "1");
    }

    let cfg = ClientConfig::from_env().unwrap();
    assert_eq!(cfg.base_url, "https://env.example.test");
    assert_eq!(cfg.retry.retries, 1);

    unsafe {
        std::env::remove_var("COURIER_BASE_URL");
        std::env::remove_var("COURIER_RETRIES");
    }
}

// =============================================================================
// normalize_base_url
// =============================================================================

#[test]
fn normalize_base_url_accepts_http_and_https() {
    assert_eq!(normalize_base_url(" http://a.test ").unwrap(), "http://a.test");
    assert_eq!(normalize_base_url("https://a.test/v1/").unwrap(), "https://a.test/v1");
}

#[test]
fn normalize_base_url_rejects_other_schemes() {
    assert!(normalize_base_url("ftp://a.test").is_err());
    assert!(normalize_base_url("a.test").is_err());
    assert!(normalize_base_url("https://").is_err());
    assert!(normalize_base_url("").is_err());
}

// =============================================================================
// AuthScheme
// =============================================================================

#[test]
fn bearer_header_rendering() {
    let scheme = AuthScheme::Bearer;
    assert_eq!(scheme.header_name(), "authorization");
    assert_eq!(scheme.header_value("tok"), "Bearer tok");
}

#[test]
fn custom_header_rendering() {
    let scheme = AuthScheme::header("X-Api-Key").unwrap();
    assert_eq!(scheme.header_name(), "X-Api-Key");
    assert_eq!(scheme.header_value("tok"), "tok");
}

#[test]
fn authorization_header_name_means_bearer() {
    assert_eq!(AuthScheme::header("Authorization").unwrap(), AuthScheme::Bearer);
}

#[test]
fn timeouts_as_durations() {
    let t = Timeouts { request_secs: 3, connect_secs: 1 };
    assert_eq!(t.request(), Duration::from_secs(3));
    assert_eq!(t.connect(), Duration::from_secs(1));
}
