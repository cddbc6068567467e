//! End-to-end tests over a real TCP listener.

use std::net::SocketAddr;
use std::time::Duration;

use request_guard::config::{GuardConfig, ProxyMode, ValidationError};
use request_guard::http::{GuardServer, ServerError};
use request_guard::lifecycle::Shutdown;
use serde_json::Value;

async fn start(config: GuardConfig) -> (SocketAddr, Shutdown, tokio::task::JoinHandle<Result<(), ServerError>>) {
    let server = GuardServer::new(config).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move { server.run(listener, server_shutdown).await });
    (addr, shutdown, handle)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn test_rate_limit_over_tcp() {
    let mut config = GuardConfig::default();
    config.rate_limit.requests = 2;
    config.rate_limit.window_ms = 60_000;
    config.rate_limit.proxy_mode = ProxyMode::NeverTrustHeader;

    let (addr, shutdown, handle) = start(config).await;
    let client = client();
    let url = format!("http://{}/hello", addr);

    for _ in 0..2 {
        let res = client.get(&url).send().await.expect("Server unreachable");
        assert_eq!(res.status(), 200);
        assert_eq!(res.headers()["x-frame-options"], "DENY");
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["client"], "127.0.0.1");
        assert_eq!(body["path"], "/hello");
    }

    let res = client.get(&url).send().await.expect("Server unreachable");
    assert_eq!(res.status(), 429);
    assert_eq!(res.headers()["x-frame-options"], "DENY");
    assert_eq!(res.text().await.unwrap(), "Ratelimited.");

    shutdown.trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_forwarded_identity_over_tcp() {
    let mut config = GuardConfig::default();
    config.rate_limit.requests = 1;
    config.rate_limit.proxy_mode = ProxyMode::AlwaysTrustHeader;
    config.headers.enabled = false;

    let (addr, shutdown, handle) = start(config).await;
    let client = client();
    let url = format!("http://{}/", addr);

    let res = client
        .get(&url)
        .header("x-forwarded-for", "1.2.3.4, 5.6.6.7")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().get("x-frame-options").is_none());
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["client"], "1.2.3.4");

    // Same connection address, different forwarded client.
    let res = client
        .get(&url)
        .header("x-forwarded-for", "9.9.9.9")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = client
        .get(&url)
        .header("x-forwarded-for", "1.2.3.4")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);

    shutdown.trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rate_limit_disabled_passes_everything() {
    let mut config = GuardConfig::default();
    config.rate_limit.enabled = false;
    config.rate_limit.requests = 0;

    let (addr, shutdown, handle) = start(config).await;
    let client = client();

    for _ in 0..5 {
        let res = client.get(format!("http://{}/", addr)).send().await.unwrap();
        assert_eq!(res.status(), 200);
        let body: Value = res.json().await.unwrap();
        assert!(body["client"].is_null());
    }

    shutdown.trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_triggered_before_run_still_stops() {
    let mut config = GuardConfig::default();
    config.rate_limit.purge_interval_secs = 1;
    let server = GuardServer::new(config).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();

    let shutdown = Shutdown::new();
    shutdown.trigger();

    let finished = tokio::time::timeout(Duration::from_secs(3), server.run(listener, shutdown)).await;
    assert!(finished.expect("Server did not stop").is_ok());
}

#[test]
fn test_bad_header_level_fails_before_serving() {
    let mut config = GuardConfig::default();
    config.headers.level = "bogus".into();
    match GuardServer::new(config) {
        Err(ServerError::Config(errors)) => {
            assert!(matches!(errors.as_slice(), [ValidationError::UnknownHeaderLevel(_)]));
        }
        other => panic!("expected config error, got {:?}", other.err()),
    }
}

#[test]
fn test_zero_limit_fails_before_serving() {
    let mut config = GuardConfig::default();
    config.rate_limit.requests = 0;
    match GuardServer::new(config) {
        Err(ServerError::Config(errors)) => assert_eq!(errors, vec![ValidationError::ZeroRequestLimit]),
        other => panic!("expected config error, got {:?}", other.err()),
    }
}

#[test]
fn test_zero_timeout_fails_before_serving() {
    let mut config = GuardConfig::default();
    config.timeouts.request_secs = 0;
    let err = GuardServer::new(config.clone()).err().expect("zero timeout accepted");
    assert!(matches!(err, ServerError::Config(ref errors) if errors == &[ValidationError::ZeroRequestTimeout]));
    assert!(err.to_string().contains("timeouts.request_secs"));

    // The limiter-supplied constructor checks it too.
    assert!(matches!(
        GuardServer::with_limiter(config, None),
        Err(ServerError::Config(_))
    ));
}
