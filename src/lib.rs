//! Request guard middleware for Axum.
//!
//! A per-client sliding window rate limiter that works out the client address
//! behind reverse proxies, and a security response header injector.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::GuardConfig;
pub use http::GuardServer;
pub use lifecycle::Shutdown;
pub use security::{ClientIp, RateLimiter, SecurityHeaders};
