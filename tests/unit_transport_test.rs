use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use pakmirror::config::UpstreamConfig;
use pakmirror::core::pipeline::transport::{RetryingClient, backoff_delay, is_retryable_status};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn fast_config() -> UpstreamConfig {
    UpstreamConfig {
        max_retries: 3,
        retry_base_delay: Duration::from_millis(10),
        retry_max_delay: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(1),
    }
}

async fn spawn_upstream(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());
    addr
}

#[test]
fn test_retryable_status_set() {
    for code in [408u16, 429, 502, 503, 504] {
        assert!(is_retryable_status(StatusCode::from_u16(code).unwrap()));
    }
    for code in [200u16, 304, 400, 403, 404, 500] {
        assert!(!is_retryable_status(StatusCode::from_u16(code).unwrap()));
    }
}

#[test]
fn test_backoff_delay_doubles_and_caps() {
    let config = UpstreamConfig {
        max_retries: 10,
        retry_base_delay: Duration::from_millis(200),
        retry_max_delay: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(1),
    };
    assert_eq!(backoff_delay(&config, 1, 1.0), Duration::from_millis(200));
    assert_eq!(backoff_delay(&config, 2, 1.0), Duration::from_millis(400));
    assert_eq!(backoff_delay(&config, 4, 1.0), Duration::from_millis(1600));
    // Capped at the maximum delay.
    assert_eq!(backoff_delay(&config, 10, 1.0), Duration::from_secs(5));
    // The jitter factor scales the capped value.
    assert_eq!(backoff_delay(&config, 10, 0.5), Duration::from_millis(2500));
}

#[tokio::test]
async fn test_retries_until_success() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let app = Router::new().route(
        "/flaky",
        get(move || {
            let seen = Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    (StatusCode::SERVICE_UNAVAILABLE, "down")
                } else {
                    (StatusCode::OK, "up")
                }
            }
        }),
    );
    let addr = spawn_upstream(app).await;

    let client = RetryingClient::new(&fast_config()).unwrap();
    let request = client
        .client()
        .get(format!("http://{addr}/flaky"))
        .build()
        .unwrap();
    let response = client.execute(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_exhausted_returns_last_response() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let app = Router::new().route(
        "/down",
        get(move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                (StatusCode::BAD_GATEWAY, "down")
            }
        }),
    );
    let addr = spawn_upstream(app).await;

    let client = RetryingClient::new(&fast_config()).unwrap();
    let request = client
        .client()
        .get(format!("http://{addr}/down"))
        .build()
        .unwrap();
    let response = client.execute(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let app = Router::new().route(
        "/gone",
        get(move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                (StatusCode::NOT_FOUND, "gone")
            }
        }),
    );
    let addr = spawn_upstream(app).await;

    let client = RetryingClient::new(&fast_config()).unwrap();
    let request = client
        .client()
        .get(format!("http://{addr}/gone"))
        .build()
        .unwrap();
    let response = client.execute(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connect_failure_surfaces_after_retries() {
    // A port nothing listens on: connection refused is transient, retried,
    // then surfaced.
    let client = RetryingClient::new(&fast_config()).unwrap();
    let request = client
        .client()
        .get("http://127.0.0.1:1/unreachable")
        .build()
        .unwrap();
    let err = client.execute(request).await.unwrap_err();
    assert!(matches!(
        err,
        pakmirror::core::ProxyError::UpstreamTransient(_)
    ));
}
