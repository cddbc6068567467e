//! Client identity resolution.
//!
//! # Responsibilities
//! - Pick the client identity from the connection address or `X-Forwarded-For`
//! - Detect a reverse proxy hiding every client behind one address
//! - Expose the resolved identity to handlers as `ClientIp`
//!
//! # Design Decisions
//! - Only the first `X-Forwarded-For` entry is used; it is spoofable unless
//!   the proxy in front is trusted
//! - Switching to header trust in `Auto` mode is one-way and starts with
//!   the request after the one that crossed the limit

use std::sync::Mutex;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};

use crate::config::ProxyMode;
use crate::observability::metrics;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Consecutive requests from one connection address tolerated before that
/// address is assumed to be a proxy.
pub const SAME_ADDRESS_LIMIT: u32 = 50;

/// The identity a request was rate limited under.
///
/// Inserted as a request extension by the rate limit middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientIp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ClientIp>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "Client identity not resolved"))
    }
}

/// Adaptive-mode bookkeeping about the connection address.
#[derive(Debug)]
struct DirectAddressTracker {
    using_direct_address: bool,
    last_direct_address: Option<String>,
    repeated_address_count: u32,
}

impl DirectAddressTracker {
    fn new() -> Self {
        Self {
            using_direct_address: true,
            last_direct_address: None,
            repeated_address_count: 0,
        }
    }

    /// Record one request from `peer`. Returns true when this observation
    /// tips the tracker over into header trust.
    fn observe(&mut self, peer: &str) -> bool {
        if self.last_direct_address.as_deref() == Some(peer) {
            self.repeated_address_count = self.repeated_address_count.saturating_add(1);
        } else {
            self.repeated_address_count = 0;
            self.last_direct_address = Some(peer.to_string());
        }

        if self.repeated_address_count > SAME_ADDRESS_LIMIT {
            self.using_direct_address = false;
            return true;
        }
        false
    }
}

/// Resolves the identity string for each request.
#[derive(Debug)]
pub struct ClientResolver {
    mode: ProxyMode,
    tracker: Mutex<DirectAddressTracker>,
}

impl ClientResolver {
    pub fn new(mode: ProxyMode) -> Self {
        Self {
            mode,
            tracker: Mutex::new(DirectAddressTracker::new()),
        }
    }

    pub fn mode(&self) -> ProxyMode {
        self.mode
    }

    /// Whether identities currently come from the connection address.
    pub fn using_direct_address(&self) -> bool {
        match self.mode {
            ProxyMode::NeverTrustHeader => true,
            ProxyMode::AlwaysTrustHeader => false,
            ProxyMode::Auto => self.lock_tracker().using_direct_address,
        }
    }

    /// Resolve the identity for a request whose connection address is `peer`
    /// (empty when unknown).
    pub fn resolve(&self, peer: &str, headers: &HeaderMap) -> String {
        match self.mode {
            ProxyMode::NeverTrustHeader => peer.to_string(),
            ProxyMode::AlwaysTrustHeader => forwarded_client(headers),
            ProxyMode::Auto => {
                let mut tracker = self.lock_tracker();
                if !tracker.using_direct_address {
                    drop(tracker);
                    return forwarded_client(headers);
                }
                if tracker.observe(peer) {
                    drop(tracker);
                    tracing::info!(
                        proxy = %peer,
                        limit = SAME_ADDRESS_LIMIT,
                        "Connection address repeated past limit, trusting X-Forwarded-For from the next request"
                    );
                    metrics::record_proxy_detected();
                }
                // The tipping request still resolves to the connection address.
                peer.to_string()
            }
        }
    }

    fn lock_tracker(&self) -> std::sync::MutexGuard<'_, DirectAddressTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// First entry of `X-Forwarded-For`, or `""` when the header is missing.
pub fn forwarded_client(headers: &HeaderMap) -> String {
    let Some(value) = headers.get(X_FORWARDED_FOR) else {
        return String::new();
    };
    let value = String::from_utf8_lossy(value.as_bytes());
    match value.find(',') {
        Some(comma) => value[..comma].to_string(),
        None => value.into_owned(),
    }
}
