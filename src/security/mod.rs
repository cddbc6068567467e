//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (resolve client via client_ip.rs, check sliding window)
//!         → 429 "Ratelimited." when over the limit
//!     → handler
//! Outgoing response:
//!     → headers.rs (strip, then stamp the configured header set)
//! ```
//!
//! # Design Decisions
//! - One `RateLimiter` per policy, shared by `Arc`; no global state
//! - Bad configuration fails at construction, never per request
//! - Malformed client addresses are identities, not errors

pub mod client_ip;
pub mod clock;
pub mod headers;
pub mod rate_limit;

pub use client_ip::{ClientIp, ClientResolver, SAME_ADDRESS_LIMIT};
pub use clock::{Clock, ManualClock, SystemClock};
pub use headers::{security_headers_middleware, HeaderPolicyError, SecurityHeaders, SecurityLevel};
pub use rate_limit::{rate_limit_middleware, RateLimitDecision, RateLimitError, RateLimiter};
