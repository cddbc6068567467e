//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → GuardServer builds the limiter and header policy from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; rate limit state is tied to one limiter
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::GuardConfig;
pub use schema::HeadersConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::ProxyMode;
pub use schema::RateLimitConfig;
pub use schema::TimeoutConfig;
pub use validation::ValidationError;
