//! Shared utilities for integration tests.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::Request,
    middleware,
    response::Response,
    routing::get,
    Router,
};
use request_guard::config::ProxyMode;
use request_guard::security::{
    rate_limit_middleware, security_headers_middleware, ClientIp, ManualClock, RateLimiter, SecurityHeaders,
};

pub const START_MILLIS: u64 = 1_700_000_000_000;

/// A GET request as if it arrived over a connection from `peer`.
pub fn request_from(peer: &str, forwarded: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/");
    if let Some(value) = forwarded {
        builder = builder.header("x-forwarded-for", value);
    }
    let mut request = builder.body(Body::empty()).unwrap();

    let ip: IpAddr = peer.parse().unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::new(ip, 40_000)));
    request
}

pub async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// A limiter on a manual clock.
pub fn manual_limiter(limit: u32, window_ms: u64, mode: ProxyMode) -> (Arc<RateLimiter>, ManualClock) {
    let clock = ManualClock::new(START_MILLIS);
    let limiter = RateLimiter::new(limit, window_ms, mode)
        .unwrap()
        .with_clock(Arc::new(clock.clone()));
    (Arc::new(limiter), clock)
}

/// A router whose handler echoes the resolved client and counts its calls.
#[allow(dead_code)]
pub fn guarded_router(
    limiter: Arc<RateLimiter>,
    header_level: Option<&str>,
    hits: Arc<AtomicUsize>,
) -> Router {
    let mut router = Router::new()
        .route(
            "/",
            get(move |ClientIp(client): ClientIp| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    client
                }
            }),
        )
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    if let Some(level) = header_level {
        let headers = Arc::new(SecurityHeaders::new(level).unwrap());
        router = router.layer(middleware::from_fn_with_state(headers, security_headers_middleware));
    }
    router
}
