//! Configuration validation.
//!
//! Serde handles syntax; this checks values. Every problem is reported, not
//! just the first one.

use std::net::SocketAddr;

use crate::config::schema::GuardConfig;
use crate::security::headers::SecurityLevel;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid {field} '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("rate_limit.requests must be greater than zero")]
    ZeroRequestLimit,

    #[error("rate_limit.window_ms must be greater than zero")]
    ZeroWindow,

    #[error("timeouts.request_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("headers.level: {0}")]
    UnknownHeaderLevel(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.rate_limit.enabled {
        if config.rate_limit.requests == 0 {
            errors.push(ValidationError::ZeroRequestLimit);
        }
        if config.rate_limit.window_ms == 0 {
            errors.push(ValidationError::ZeroWindow);
        }
    }

    if config.headers.enabled {
        if let Err(e) = config.headers.level.parse::<SecurityLevel>() {
            errors.push(ValidationError::UnknownHeaderLevel(e.to_string()));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
