//! Per-IP-per-route rate limiting with a fixed one-minute window (spec
//! §6). The `http-rpc-gateway` reference's `IpLimiter` uses a token
//! bucket refilled continuously; this adaptation counts requests in a
//! window that resets wholesale once it elapses, per the fixed-window
//! wording the spec uses (see DESIGN.md).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::extract::ConnectInfo;
use axum::extract::Request;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use dashmap::DashMap;
use serde_json::json;

const WINDOW: Duration = Duration::from_secs(60);

struct Counter {
    count: u32,
    window_start: Instant,
}

/// Shared across every request; cheap to clone.
#[derive(Clone)]
pub struct RateLimiter {
    limit_per_minute: u32,
    counters: Arc<DashMap<(IpAddr, String), Counter>>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self { limit_per_minute, counters: Arc::new(DashMap::new()) }
    }

    /// `true` if this request should be let through, bumping the
    /// counter as a side effect.
    fn check(&self, ip: IpAddr, route: &str) -> bool {
        if self.limit_per_minute == 0 {
            return true;
        }
        let key = (ip, route.to_string());
        let now = Instant::now();
        let mut entry = self.counters.entry(key).or_insert_with(|| Counter { count: 0, window_start: now });
        if now.duration_since(entry.window_start) >= WINDOW {
            entry.count = 0;
            entry.window_start = now;
        }
        if entry.count >= self.limit_per_minute {
            return false;
        }
        entry.count += 1;
        true
    }
}

pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let route = request.uri().path().to_string();
    if limiter.check(addr.ip(), &route) {
        next.run(request).await
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"ok": false, "error": "rate limit exceeded, try again shortly"})),
        )
            .into_response()
    }
}
