use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::time::Instant;

use super::*;

fn policy(retries: u32) -> RetryPolicy {
    RetryPolicy::new(retries, Duration::from_millis(100))
}

// =============================================================================
// delay_for
// =============================================================================

#[test]
fn delay_doubles_each_attempt() {
    let p = policy(5);
    assert_eq!(p.delay_for(0), Duration::from_millis(100));
    assert_eq!(p.delay_for(1), Duration::from_millis(200));
    assert_eq!(p.delay_for(2), Duration::from_millis(400));
    assert_eq!(p.delay_for(3), Duration::from_millis(800));
}

#[test]
fn delay_saturates() {
    let p = RetryPolicy::new(100, Duration::from_secs(u64::MAX / 2));
    assert_eq!(p.delay_for(40), Duration::MAX);
    assert_eq!(p.delay_for(2), Duration::MAX);
}

#[test]
fn defaults() {
    let p = RetryPolicy::default();
    assert_eq!(p.retries, DEFAULT_RETRIES);
    assert_eq!(p.base_delay, Duration::from_millis(DEFAULT_RETRY_BASE_MS));
    assert_eq!(RetryPolicy::none().retries, 0);
}

#[test]
fn should_retry_everything_but_forbidden() {
    assert!(!RetryPolicy::should_retry(&ApiError::from_kind(ErrorKind::Forbidden)));
    assert!(RetryPolicy::should_retry(&ApiError::from_kind(ErrorKind::NetworkError)));
    assert!(RetryPolicy::should_retry(&ApiError::from_kind(ErrorKind::ServerError)));
    assert!(RetryPolicy::should_retry(&ApiError::from_kind(ErrorKind::NotFound)));
}

// =============================================================================
// with_retry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn always_failing_network_error_runs_retries_plus_one() {
    let calls = Arc::new(AtomicU32::new(0));
    let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));

    let result: Result<(), ApiError> = with_retry(policy(3), || {
        let calls = calls.clone();
        let stamps = stamps.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            stamps.lock().unwrap().push(Instant::now());
            Err(ApiError::network("connection refused"))
        }
    })
    .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NetworkError);
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let stamps = stamps.lock().unwrap();
    let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(400)]
    );
    assert!(gaps.windows(2).all(|w| w[1] > w[0]));
}

#[tokio::test(start_paused = true)]
async fn forbidden_is_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));

    let result: Result<(), ApiError> = with_retry(policy(5), || {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::from_response(403, None, r#"{"error":"admins only"}"#))
        }
    })
    .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Forbidden);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn succeeds_after_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));

    let result = with_retry(policy(3), || {
        let calls = calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 { Err(ApiError::from_response(503, None, "")) } else { Ok(n) }
        }
    })
    .await;

    assert_eq!(result.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn final_error_is_returned_unchanged() {
    let calls = Arc::new(AtomicU32::new(0));

    let result: Result<(), ApiError> = with_retry(policy(1), || {
        let calls = calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::from_response(500, None, &format!(r#"{{"message":"attempt {n}"}}"#)))
        }
    })
    .await;

    let err = result.unwrap_err();
    assert_eq!(err.message(), "attempt 1");
    assert_eq!(err.status(), Some(500));
}

#[tokio::test(start_paused = true)]
async fn zero_retries_runs_once() {
    let calls = Arc::new(AtomicU32::new(0));

    let result: Result<(), ApiError> = with_retry(RetryPolicy::none(), || {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::network("timeout"))
        }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// with_retry_when
// =============================================================================

#[tokio::test(start_paused = true)]
async fn custom_predicate_stops_on_unauthorized() {
    let calls = Arc::new(AtomicU32::new(0));

    let result: Result<(), ApiError> = with_retry_when(policy(3), |e: &ApiError| e.kind().retryable(), || {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::from_response(401, None, ""))
        }
    })
    .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Unauthorized);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn custom_predicate_still_retries_matching_errors() {
    let calls = Arc::new(AtomicU32::new(0));

    let result: Result<(), ApiError> = with_retry_when(policy(2), |e: &ApiError| e.kind().retryable(), || {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::from_response(502, None, ""))
        }
    })
    .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::ServerError);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
