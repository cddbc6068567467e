//! Security response headers.
//!
//! # Responsibilities
//! - Map a named security level to a fixed header set
//! - Strip `X-Powered-By` from responses
//! - Stamp the chosen header set on every response
//!
//! # Design Decisions
//! - Unknown levels fail when the policy is built, never per request
//! - Header names and values are parsed once at construction
//! - The set is a baseline: a header the handler already set (including
//!   `Strict-Transport-Security`) is left alone

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

const X_POWERED_BY: &str = "x-powered-by";

const HIGH: &[(&str, &str)] = &[
    ("Strict-Transport-Security", "max-age=63072000; includeSubDomains; preload"),
    ("Content-Security-Policy", "default-src 'self'; base-uri 'self'; form-action 'self'; img-src 'self'; object-src 'none'; frame-ancestors 'self'; require-trusted-types-for 'script'"),
    ("X-Frame-Options", "DENY"),
    ("X-Content-Type-Options", "nosniff"),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
    ("Permissions-Policy", "geolocation=(), midi=(), sync-xhr=(), accelerometer=(), gyroscope=(), magnetometer=(), camera=(), fullscreen=(self)"),
    ("Cross-Origin-Embedder-Policy", "require-corp"),
    ("Cross-Origin-Embedder-Policy-Report-Only", "require-corp"),
    ("Cross-Origin-Opener-Policy", "same-origin"),
    ("Cross-Origin-Opener-Policy-Report-Only", "same-origin"),
    ("Cross-Origin-Resource-Policy", "same-site"),
];

const MEDIUM: &[(&str, &str)] = &[
    ("Strict-Transport-Security", "max-age=63072000; includeSubDomains; preload"),
    ("Content-Security-Policy", "default-src 'self'; base-uri 'self'; form-action 'self'; img-src 'self'; frame-ancestors 'self'; require-trusted-types-for 'script'"),
    ("X-Frame-Options", "SAMEORIGIN"),
    ("X-Xss-Protection", "1; mode=block"),
    ("X-Content-Type-Options", "nosniff"),
    ("Referrer-Policy", "no-referrer-when-downgrade"),
    ("Permissions-Policy", "geolocation=(), midi=(), sync-xhr=(), accelerometer=(), gyroscope=(), magnetometer=(), camera=(), fullscreen=(self)"),
    ("Cross-Origin-Embedder-Policy", "require-corp"),
    ("Cross-Origin-Embedder-Policy-Report-Only", "require-corp"),
    ("Cross-Origin-Opener-Policy", "same-origin-allow-popups"),
    ("Cross-Origin-Opener-Policy-Report-Only", "same-origin-allow-popups"),
    ("Cross-Origin-Resource-Policy", "same-site"),
];

const LOW: &[(&str, &str)] = &[
    ("Strict-Transport-Security", "max-age=63072000; includeSubDomains; preload"),
    ("Content-Security-Policy", "default-src 'https:'"),
    ("Referrer-Policy", "no-referrer-when-downgrade"),
];

const NONE: &[(&str, &str)] = &[];

/// Errors building a header policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderPolicyError {
    #[error("Invalid security level: '{0}', expected 'high', 'medium', or 'low'.")]
    UnknownLevel(String),

    #[error("invalid header '{name}'")]
    InvalidHeader { name: &'static str },
}

/// Named security header sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecurityLevel {
    #[default]
    High,
    Medium,
    Low,
    None,
}

impl SecurityLevel {
    /// Header names and values for this level, in the order they are applied.
    pub fn table(self) -> &'static [(&'static str, &'static str)] {
        match self {
            SecurityLevel::High => HIGH,
            SecurityLevel::Medium => MEDIUM,
            SecurityLevel::Low => LOW,
            SecurityLevel::None => NONE,
        }
    }
}

impl FromStr for SecurityLevel {
    type Err = HeaderPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = s.to_lowercase();
        match level.as_str() {
            "high" | "h" => Ok(SecurityLevel::High),
            "medium" | "m" => Ok(SecurityLevel::Medium),
            "low" | "l" => Ok(SecurityLevel::Low),
            "none" | "n" => Ok(SecurityLevel::None),
            _ => Err(HeaderPolicyError::UnknownLevel(level)),
        }
    }
}

/// A resolved header set, ready to stamp on responses.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    level: SecurityLevel,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    /// Build the policy for a level name such as `"high"` or `"m"`.
    pub fn new(level: &str) -> Result<Self, HeaderPolicyError> {
        Self::for_level(level.parse()?)
    }

    pub fn for_level(level: SecurityLevel) -> Result<Self, HeaderPolicyError> {
        let headers = level
            .table()
            .iter()
            .map(|&(name, value)| {
                let header_name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| HeaderPolicyError::InvalidHeader { name })?;
                let header_value =
                    HeaderValue::from_str(value).map_err(|_| HeaderPolicyError::InvalidHeader { name })?;
                Ok((header_name, header_value))
            })
            .collect::<Result<Vec<_>, HeaderPolicyError>>()?;

        Ok(Self { level, headers })
    }

    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Remove `X-Powered-By`, then add every header of the set the
    /// response does not already carry.
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.remove(X_POWERED_BY);
        for (name, value) in &self.headers {
            headers.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// Middleware function that stamps security headers on every response.
pub async fn security_headers_middleware(
    State(policy): State<Arc<SecurityHeaders>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    policy.apply(response.headers_mut());
    response
}
