//! HTTP API for the moderation engine
//!
//! - Moderation API (message evaluation, strikes, immunity, whitelist)
//! - Security middleware (auth, rate limiting, headers, body size)

pub mod middleware;
pub mod moderation;

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

pub use middleware::{
    auth_middleware, body_size_middleware, logging_middleware, rate_limit_middleware,
    security_headers_middleware, RateDecision, RateLimiter, SecurityMiddlewareConfig,
    SecurityState,
};
pub use moderation::{create_router as create_moderation_router, ModerationApiState};

/// Full application router with security layers applied.
///
/// Rate limiting and request logging read `ConnectInfo`, so the router must be
/// served with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_app(moderation: ModerationApiState, security: SecurityState) -> Router {
    Router::new()
        .nest("/moderation", create_moderation_router(moderation))
        .route("/health", get(|| async { "OK" }))
        // Innermost first: size check runs after auth and rate limiting
        .layer(axum_middleware::from_fn_with_state(security.clone(), body_size_middleware))
        .layer(axum_middleware::from_fn_with_state(security.clone(), auth_middleware))
        .layer(axum_middleware::from_fn_with_state(security.clone(), rate_limit_middleware))
        .layer(axum_middleware::from_fn_with_state(security, logging_middleware))
        .layer(axum_middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
}
