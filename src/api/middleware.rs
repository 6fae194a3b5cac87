//! Security Middleware for the moderation API
//!
//! Provides:
//! - API key authentication for admin and evaluation routes
//! - Rate limiting per client IP
//! - Request body size limits
//! - Security headers
//! - Request logging with address masking

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{sanitize_for_logging, AppConfig};

/// Security configuration for middleware
#[derive(Debug, Clone)]
pub struct SecurityMiddlewareConfig {
    /// Enable API key authentication
    pub enable_auth: bool,
    /// Valid API keys
    pub api_keys: Vec<String>,
    /// Rate limit: requests per minute per IP
    pub rate_limit_per_minute: u32,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    /// Enable request logging
    pub log_requests: bool,
    /// Mask client addresses in logs
    pub sanitize_logs: bool,
    /// Path prefixes that don't require authentication
    pub public_paths: Vec<String>,
}

impl Default for SecurityMiddlewareConfig {
    fn default() -> Self {
        Self {
            enable_auth: true,
            api_keys: Vec::new(),
            rate_limit_per_minute: 600,
            max_request_size: 64 * 1024,
            log_requests: false,
            sanitize_logs: true,
            public_paths: vec!["/health".to_string()],
        }
    }
}

impl SecurityMiddlewareConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            enable_auth: config.security.enable_auth,
            api_keys: config.security.api_keys.clone(),
            rate_limit_per_minute: config.security.rate_limit_per_minute,
            max_request_size: config.security.max_request_size,
            log_requests: config.logging.log_requests,
            sanitize_logs: config.logging.sanitize_logs,
            ..Self::default()
        }
    }
}

/// Fixed-window request counter per client
#[derive(Debug)]
pub struct RateLimiter {
    /// client -> (requests in window, window start)
    requests: DashMap<String, (u32, Instant)>,
    limit: u32,
    window: Duration,
}

/// Verdict for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_after_secs: u64,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            requests: DashMap::new(),
            limit,
            window,
        }
    }

    pub fn check(&self, client: &str) -> RateDecision {
        let now = Instant::now();
        let mut entry = self.requests.entry(client.to_string()).or_insert((0, now));
        let (count, window_start) = entry.value_mut();

        if now.duration_since(*window_start) >= self.window {
            *count = 0;
            *window_start = now;
        }

        let reset_after_secs = self
            .window
            .saturating_sub(now.duration_since(*window_start))
            .as_secs();

        if *count >= self.limit {
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_after_secs,
            };
        }

        *count += 1;
        RateDecision {
            allowed: true,
            remaining: self.limit - *count,
            reset_after_secs,
        }
    }

    /// Forget clients idle for two windows
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.requests
            .retain(|_, (_, window_start)| now.duration_since(*window_start) < self.window * 2);
    }

    pub fn tracked_clients(&self) -> usize {
        self.requests.len()
    }
}

/// Shared state for security middleware
#[derive(Clone)]
pub struct SecurityState {
    pub config: Arc<SecurityMiddlewareConfig>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl SecurityState {
    pub fn new(config: SecurityMiddlewareConfig) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
        Self {
            config: Arc::new(config),
            rate_limiter,
        }
    }
}

/// Client IP, preferring proxy headers over the socket address
fn client_ip(headers: &HeaderMap, addr: Option<&SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| addr.map(|a| a.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn is_public_path(path: &str, public_paths: &[String]) -> bool {
    public_paths.iter().any(|p| path.starts_with(p.as_str()))
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(str::trim)
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<SecurityState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path().to_string();

    if !state.config.enable_auth || is_public_path(&path, &state.config.public_paths) {
        return Ok(next.run(request).await);
    }

    match presented_key(&headers) {
        Some(key) if state.config.api_keys.iter().any(|k| k == key) => {
            debug!(path = %path, "API key authenticated");
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!(path = %path, "Invalid API key attempt");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!(path = %path, "Missing API key");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

fn rate_headers(headers: &mut HeaderMap, limit: u32, decision: RateDecision) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.reset_after_secs));
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(state): State<SecurityState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let client = client_ip(&headers, Some(&addr));
    let decision = state.rate_limiter.check(&client);
    let limit = state.config.rate_limit_per_minute;

    if !decision.allowed {
        warn!(
            client_ip = %sanitize_for_logging(&client),
            path = %request.uri().path(),
            "Rate limit exceeded"
        );
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        rate_headers(response.headers_mut(), limit, decision);
        response
            .headers_mut()
            .insert("Retry-After", HeaderValue::from(decision.reset_after_secs));
        return response;
    }

    let mut response = next.run(request).await;
    rate_headers(response.headers_mut(), limit, decision);
    response
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert("Content-Security-Policy", HeaderValue::from_static("default-src 'none'"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    // Decisions and member status must never be cached by intermediaries
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.remove("Server");

    response
}

/// Request logging middleware with address masking
pub async fn logging_middleware(
    State(state): State<SecurityState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.log_requests {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = client_ip(&headers, Some(&addr));
    let log_ip = if state.config.sanitize_logs {
        sanitize_for_logging(&client)
    } else {
        client
    };

    let response = next.run(request).await;
    let status = response.status();
    let duration_ms = start.elapsed().as_millis() as u64;

    if status.is_server_error() {
        warn!(method = %method, path = %path, status = status.as_u16(), duration_ms, client_ip = %log_ip, "Request failed");
    } else {
        info!(method = %method, path = %path, status = status.as_u16(), duration_ms, client_ip = %log_ip, "Request completed");
    }

    response
}

/// Request body size validation middleware
pub async fn body_size_middleware(
    State(state): State<SecurityState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let declared = headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if let Some(length) = declared {
        if length > state.config.max_request_size {
            warn!(
                length = length,
                max = state.config.max_request_size,
                "Request body too large"
            );
            return Err(StatusCode::PAYLOAD_TOO_LARGE);
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter() {
        let limiter = RateLimiter::new(3);

        assert!(limiter.check("127.0.0.1").allowed);
        assert!(limiter.check("127.0.0.1").allowed);
        let third = limiter.check("127.0.0.1");
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);

        let fourth = limiter.check("127.0.0.1");
        assert!(!fourth.allowed);
        assert_eq!(fourth.remaining, 0);

        assert!(limiter.check("192.168.1.1").allowed);
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_rate_limiter_window_rolls() {
        let limiter = RateLimiter::with_window(1, Duration::from_millis(0));
        assert!(limiter.check("10.0.0.1").allowed);
        assert!(limiter.check("10.0.0.1").allowed);
    }

    #[test]
    fn test_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        let addr: SocketAddr = "10.1.1.1:5000".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(&addr)), "10.1.1.1");

        headers.insert("x-real-ip", HeaderValue::from_static("172.16.0.9"));
        assert_eq!(client_ip(&headers, Some(&addr)), "172.16.0.9");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers, Some(&addr)), "203.0.113.7");
    }

    #[test]
    fn test_presented_key() {
        let mut headers = HeaderMap::new();
        assert_eq!(presented_key(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(presented_key(&headers), Some("abc123"));

        headers.insert("x-api-key", HeaderValue::from_static("xyz"));
        assert_eq!(presented_key(&headers), Some("xyz"));
    }

    #[test]
    fn test_is_public_path() {
        let public = vec!["/health".to_string()];
        assert!(is_public_path("/health", &public));
        assert!(!is_public_path("/moderation/evaluate", &public));
    }
}
