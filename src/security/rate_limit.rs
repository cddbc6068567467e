//! Per-client sliding window rate limiting middleware.
//!
//! Each client identity keeps a log of its request timestamps. On every
//! request the log is trimmed to the window, then the request is admitted
//! only if fewer than `request_limit` entries remain.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::config::{ProxyMode, RateLimitConfig};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::security::client_ip::{ClientIp, ClientResolver};
use crate::security::clock::{Clock, SystemClock};

/// Body sent with every rejection.
pub const REJECTION_BODY: &str = "Ratelimited.";

/// Invalid limiter construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("request limit must be greater than zero")]
    ZeroLimit,
    #[error("window must be greater than zero")]
    ZeroWindow,
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request admitted and recorded.
    Allowed {
        /// Requests still available in the current window.
        remaining: u32,
    },
    /// Request rejected, nothing recorded.
    Limited {
        /// Time until the oldest request in the window expires.
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

/// Chronological request timestamps (ms since epoch) for one client.
#[derive(Debug, Default)]
struct ClientBucket {
    timestamps: VecDeque<u64>,
}

impl ClientBucket {
    fn starting_at(now: u64) -> Self {
        Self {
            timestamps: VecDeque::from([now]),
        }
    }

    /// Drop every timestamp strictly older than `window_ms`.
    fn evict(&mut self, now: u64, window_ms: u64) {
        self.timestamps.retain(|&t| now.saturating_sub(t) <= window_ms);
    }

    /// Evict, then append `now` if the client is under `limit`.
    fn try_admit(&mut self, now: u64, window_ms: u64, limit: u32) -> RateLimitDecision {
        self.evict(now, window_ms);
        let used = self.timestamps.len() as u32;
        if used < limit {
            self.timestamps.push_back(now);
            RateLimitDecision::Allowed {
                remaining: limit - used - 1,
            }
        } else {
            RateLimitDecision::Limited {
                retry_after: self.retry_after(now, window_ms),
            }
        }
    }

    fn retry_after(&self, now: u64, window_ms: u64) -> Duration {
        let oldest = self.timestamps.iter().min().copied().unwrap_or(now);
        let expires_at = oldest.saturating_add(window_ms).saturating_add(1);
        Duration::from_millis(expires_at.saturating_sub(now))
    }
}

/// Shared rate limiter state. One instance per rate limit policy.
pub struct RateLimiter {
    buckets: DashMap<String, ClientBucket>,
    resolver: ClientResolver,
    request_limit: u32,
    window_ms: u64,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Allow `request_limit` requests per `window_ms` milliseconds per client.
    pub fn new(request_limit: u32, window_ms: u64, mode: ProxyMode) -> Result<Self, RateLimitError> {
        if request_limit == 0 {
            return Err(RateLimitError::ZeroLimit);
        }
        if window_ms == 0 {
            return Err(RateLimitError::ZeroWindow);
        }
        Ok(Self {
            buckets: DashMap::new(),
            resolver: ClientResolver::new(mode),
            request_limit,
            window_ms,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        Self::new(config.requests, config.window_ms, config.proxy_mode)
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn request_limit(&self) -> u32 {
        self.request_limit
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn resolver(&self) -> &ClientResolver {
        &self.resolver
    }

    /// Number of client identities currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }

    /// Resolve the identity of a request; see [`ClientResolver::resolve`].
    pub fn resolve_client(&self, peer: &str, headers: &axum::http::HeaderMap) -> String {
        self.resolver.resolve(peer, headers)
    }

    /// Check and record a request from `client` at the current time.
    pub fn check(&self, client: &str) -> RateLimitDecision {
        self.check_at(client, self.clock.now_millis())
    }

    /// Check and record a request from `client` at `now` (ms since epoch).
    pub fn check_at(&self, client: &str, now: u64) -> RateLimitDecision {
        // The shard write lock is held from lookup through append.
        if let Some(mut bucket) = self.buckets.get_mut(client) {
            return bucket.try_admit(now, self.window_ms, self.request_limit);
        }

        let mut created = false;
        let decision = {
            let mut bucket = self.buckets.entry(client.to_string()).or_insert_with(|| {
                created = true;
                ClientBucket::starting_at(now)
            });
            if created {
                RateLimitDecision::Allowed {
                    remaining: self.request_limit - 1,
                }
            } else {
                // Another request created the bucket between the two lookups.
                bucket.try_admit(now, self.window_ms, self.request_limit)
            }
        };

        if created {
            metrics::record_tracked_clients(self.buckets.len());
        }
        decision
    }

    /// Drop clients whose whole log has aged out of the window.
    pub fn purge_idle(&self) -> usize {
        self.purge_idle_at(self.clock.now_millis())
    }

    pub fn purge_idle_at(&self, now: u64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            bucket.evict(now, self.window_ms);
            !bucket.timestamps.is_empty()
        });
        let removed = before.saturating_sub(self.buckets.len());

        if removed > 0 {
            tracing::debug!(removed, remaining = self.buckets.len(), "Purged idle rate limit buckets");
            metrics::record_buckets_purged(removed);
        }
        metrics::record_tracked_clients(self.buckets.len());
        removed
    }
}

/// Purge idle buckets every `interval` until shutdown is signalled.
pub fn spawn_purge_task(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    limiter.purge_idle();
                }
                _ = shutdown.wait() => {
                    tracing::debug!("Rate limit purge task stopping");
                    break;
                }
            }
        }
    })
}

/// The 429 sent when a client is over its limit.
pub fn rejection_response(retry_after: Duration) -> Response {
    let mut response = Response::new(Body::from(REJECTION_BODY));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    let secs = retry_after.as_millis().div_ceil(1000).max(1);
    headers.insert(header::RETRY_AFTER, HeaderValue::from(secs as u64));
    response
}

/// Middleware function for per-client rate limiting.
///
/// The resolved identity is attached to the request as [`ClientIp`] before
/// the check, so handlers further down can read it.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default();

    let client = limiter.resolve_client(&peer, request.headers());
    let decision = limiter.check(&client);
    request.extensions_mut().insert(ClientIp(client.clone()));

    match decision {
        RateLimitDecision::Allowed { .. } => {
            metrics::record_decision("allowed");
            next.run(request).await
        }
        RateLimitDecision::Limited { retry_after } => {
            tracing::warn!(client = %client, peer = %peer, retry_after = ?retry_after, "Rate limit exceeded");
            metrics::record_decision("limited");
            rejection_response(retry_after)
        }
    }
}
