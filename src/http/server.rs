//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the demo handler
//! - Wire up middleware (security headers, rate limit, timeout, tracing)
//! - Serve with connect info so the limiter sees peer addresses
//! - Own the idle bucket purge task for the server's lifetime

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::Request,
    middleware,
    routing::any,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::validation::{validate_config, ValidationError};
use crate::config::GuardConfig;
use crate::lifecycle::Shutdown;
use crate::security::client_ip::ClientIp;
use crate::security::headers::{security_headers_middleware, HeaderPolicyError, SecurityHeaders};
use crate::security::rate_limit::{rate_limit_middleware, spawn_purge_task, RateLimitError, RateLimiter};

/// Errors building or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {}", join_errors(.0))]
    Config(Vec<ValidationError>),

    #[error("rate limiter: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("security headers: {0}")]
    Headers(#[from] HeaderPolicyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// HTTP server guarded by the rate limiter and security headers.
pub struct GuardServer {
    router: Router,
    config: GuardConfig,
    limiter: Option<Arc<RateLimiter>>,
}

impl GuardServer {
    /// Build the server from configuration. Fails on any invalid setting,
    /// before anything is served.
    pub fn new(config: GuardConfig) -> Result<Self, ServerError> {
        validate_config(&config).map_err(ServerError::Config)?;
        let limiter = if config.rate_limit.enabled {
            Some(Arc::new(RateLimiter::from_config(&config.rate_limit)?))
        } else {
            None
        };
        Self::with_limiter(config, limiter)
    }

    /// Build the server around an existing limiter (or none).
    ///
    /// The limiter's own settings take precedence over `config.rate_limit`.
    pub fn with_limiter(config: GuardConfig, limiter: Option<Arc<RateLimiter>>) -> Result<Self, ServerError> {
        if config.timeouts.request_secs == 0 {
            return Err(ServerError::Config(vec![ValidationError::ZeroRequestTimeout]));
        }
        let headers = if config.headers.enabled {
            Some(Arc::new(SecurityHeaders::new(&config.headers.level)?))
        } else {
            None
        };

        let router = Self::build_router(&config, limiter.clone(), headers);
        Ok(Self {
            router,
            config,
            limiter,
        })
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Headers wrap the limiter so rejections carry them too.
    #[allow(deprecated)]
    fn build_router(
        config: &GuardConfig,
        limiter: Option<Arc<RateLimiter>>,
        headers: Option<Arc<SecurityHeaders>>,
    ) -> Router {
        let mut router = Router::new()
            .route("/", any(whoami_handler))
            .route("/{*path}", any(whoami_handler));

        if let Some(limiter) = limiter {
            router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }
        if let Some(headers) = headers {
            router = router.layer(middleware::from_fn_with_state(headers, security_headers_middleware));
        }

        router
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// The router, for serving it elsewhere or calling it directly.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires. A shutdown triggered
    /// before this call stops the server right after it starts.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            rate_limit = self.limiter.is_some(),
            header_level = %self.config.headers.level,
            "HTTP server starting"
        );

        let purge_secs = self.config.rate_limit.purge_interval_secs;
        let purge_task = match &self.limiter {
            Some(limiter) if purge_secs > 0 => Some(spawn_purge_task(
                limiter.clone(),
                Duration::from_secs(purge_secs),
                shutdown.clone(),
            )),
            _ => None,
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        if let Some(task) = purge_task {
            let _ = task.await;
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Echo who the guard thinks the caller is.
async fn whoami_handler(request: Request<Body>) -> Json<Value> {
    let client = request.extensions().get::<ClientIp>().map(|c| c.0.clone());
    Json(json!({
        "client": client,
        "method": request.method().as_str(),
        "path": request.uri().path(),
    }))
}
