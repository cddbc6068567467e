//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, connect info)
//!     → security headers (outermost, response side)
//!     → rate limiter (resolve client, admit or 429)
//!     → whoami handler
//! ```

pub mod server;

pub use server::{GuardServer, ServerError};
