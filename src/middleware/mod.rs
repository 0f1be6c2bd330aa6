//! HTTP Middleware
//!
//! cron 엔드포인트 보호용 레이어. 적용 순서는 rate limit → bearer 인증.

pub mod auth;
pub mod rate_limit;

pub use auth::require_cron_secret;
pub use rate_limit::{ip_rate_limiter, rate_limit, spawn_rate_limiter_gc, IpRateLimiter};
