//! Per-IP rate limiting for sign-in and code endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down brute force
//! and email flooding. These limits sit in front of the per-license OTP
//! cooldown, which is enforced separately.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};

use crate::auth::extract_client_ip;
use crate::server_config;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limiting configuration for the public flow endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Password sign-in (5 requests per 10 seconds)
    pub sign_in: Arc<IpLimiter>,
    /// License start and resend, which send email (5 requests per minute)
    pub otp_send: Arc<IpLimiter>,
    /// Code verification (10 requests per minute)
    pub otp_verify: Arc<IpLimiter>,
    /// Forgot-password requests, which send email (3 requests per minute)
    pub password_forgot: Arc<IpLimiter>,
}

fn quota(per_second: u32, burst: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN))
}

fn per_minute(count: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(count).unwrap_or(NonZeroU32::MIN))
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sign_in: Arc::new(RateLimiter::keyed(quota(1, 5))),
            otp_send: Arc::new(RateLimiter::keyed(per_minute(5))),
            otp_verify: Arc::new(RateLimiter::keyed(per_minute(10))),
            password_forgot: Arc::new(RateLimiter::keyed(per_minute(3))),
        }
    }
}

impl RateLimitConfig {
    /// Limits high enough to never trigger, for tests that drive many requests.
    pub fn permissive() -> Self {
        let generous = || Arc::new(RateLimiter::keyed(quota(10_000, 10_000)));
        Self {
            sign_in: generous(),
            otp_send: generous(),
            otp_verify: generous(),
            password_forgot: generous(),
        }
    }
}

/// Middleware that rejects a request once its IP exhausts `limiter`.
pub async fn rate_limit(
    State(limiter): State<Arc<IpLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(&request, server_config::ip_extractor().as_ref()) {
        Ok(ip) => ip,
        Err(_) => {
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": "Unable to determine client IP." })),
            )
                .into_response();
        }
    };

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::info!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({ "error": "Too many requests. Please try again later." })),
            )
                .into_response()
        }
    }
}
