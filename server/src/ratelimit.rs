//! Per-client-IP sliding-window rate limiter (§4.5). The teacher backs its
//! `RateLimiter` with Redis and a Lua script so counters survive across
//! replicas; this pipeline runs a single server process per deployment, so
//! an in-process `dashmap` window is sufficient and avoids pulling in a
//! second store for one concern. The result shape and 429 response layout
//! otherwise follow the teacher's `RateLimitResult` / `RateLimitError`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::HeaderValue;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use serde::Serialize;

const WINDOW: Duration = Duration::from_secs(60);

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after: u64,
}

#[derive(Default)]
struct Window {
    hits: Vec<Instant>,
}

/// Sliding-window counter keyed by normalized client IP.
pub struct RateLimiter {
    limit: u32,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            windows: DashMap::new(),
        }
    }

    /// Record a hit for `key` and report whether it falls within the limit.
    /// Stale hits (outside the trailing 60s window) are dropped on every
    /// call, so the map never grows per-key beyond `limit` entries.
    pub fn check(&self, key: &str) -> RateLimitResult {
        let now = Instant::now();
        let mut window = self.windows.entry(key.to_string()).or_default();
        window.hits.retain(|hit| now.duration_since(*hit) < WINDOW);

        if window.hits.len() as u32 >= self.limit {
            let oldest = window.hits.first().copied().unwrap_or(now);
            let retry_after = WINDOW.saturating_sub(now.duration_since(oldest)).as_secs().max(1);
            return RateLimitResult {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                retry_after,
            };
        }

        window.hits.push(now);
        let remaining = self.limit - window.hits.len() as u32;
        RateLimitResult {
            allowed: true,
            limit: self.limit,
            remaining,
            retry_after: 0,
        }
    }
}

/// Client IP per §4.5: first entry of `X-Forwarded-For` if present, else the
/// peer address from the connection.
pub fn extract_client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> IpAddr {
    if let Some(forwarded) = headers.get("X-Forwarded-For") {
        if let Ok(s) = forwarded.to_str() {
            if let Some(first) = s.split(',').next() {
                if let Ok(ip) = first.trim().parse() {
                    return ip;
                }
            }
        }
    }
    connect_info
        .map(|c| c.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[derive(Serialize)]
struct RateLimitErrorResponse {
    error: &'static str,
    message: String,
    retry_after: u64,
    limit: u32,
    remaining: u32,
}

fn too_many_requests(result: RateLimitResult) -> Response {
    let body = RateLimitErrorResponse {
        error: "rate_limited",
        message: format!("Too many requests. Wait {} seconds.", result.retry_after),
        retry_after: result.retry_after,
        limit: result.limit,
        remaining: result.remaining,
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    insert_rate_limit_headers(response.headers_mut(), &result);
    response
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    if let Ok(v) = HeaderValue::from_str(&result.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&result.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if !result.allowed {
        if let Ok(v) = HeaderValue::from_str(&result.retry_after.to_string()) {
            headers.insert("Retry-After", v);
        }
    }
}

/// Enforce the sliding window against `state.rate_limiter`, tagging both
/// allowed and rejected responses with standard rate-limit headers.
pub async fn enforce(
    State(state): State<crate::state::AppState>,
    request: Request,
    next: Next,
) -> Response {
    let connect_info = request.extensions().get::<ConnectInfo<SocketAddr>>().copied();
    let ip = extract_client_ip(request.headers(), connect_info.as_ref());
    let result = state.rate_limiter.check(&ip.to_string());

    if !result.allowed {
        return too_many_requests(result);
    }

    let mut response = next.run(request).await;
    insert_rate_limit_headers(response.headers_mut(), &result);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_blocks() {
        let limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.check("1.2.3.4").allowed);
        }
        let blocked = limiter.check("1.2.3.4");
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
        assert!(blocked.retry_after >= 1);
    }

    #[test]
    fn different_keys_have_independent_windows() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
        assert!(!limiter.check("a").allowed);
    }

    #[test]
    fn extract_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.50, 70.41.3.18".parse().unwrap());
        let socket = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 12345);
        let connect_info = ConnectInfo(socket);

        let ip = extract_client_ip(&headers, Some(&connect_info));
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::new(203, 0, 113, 50)));
    }

    #[test]
    fn extract_client_ip_falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        let socket = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 12345);
        let connect_info = ConnectInfo(socket);

        let ip = extract_client_ip(&headers, Some(&connect_info));
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn extract_client_ip_defaults_to_localhost_with_nothing_available() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers, None), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
