//! Per-IP Rate Limiting
//!
//! governor keyed limiter. 클라이언트 IP는 기본적으로 소켓 주소(ConnectInfo)를 쓰고,
//! `TRUST_PROXY_HEADERS=true`일 때만 프록시 헤더를 본다.
//!
//! # Interview Q&A
//!
//! Q: 왜 `x-forwarded-for`를 기본으로 믿지 않나?
//! A: 클라이언트가 임의로 넣을 수 있는 헤더
//!    - 요청마다 값을 바꾸면 매번 새 버킷 → 제한 우회
//!    - 키가 계속 늘어나 limiter 메모리가 무한히 증가
//!
//! Q: 프록시 뒤에서는 어느 주소를 쓰나?
//! A: `x-forwarded-for`의 마지막 주소 (우리 프록시가 붙인 값)
//!    - 앞쪽 주소는 클라이언트가 보낸 그대로라 위조 가능
//!
//! Q: 키가 쌓이는 건 어떻게 정리하나?
//! A: `spawn_rate_limiter_gc`가 주기적으로 `retain_recent()` 호출
//!    - 쿼터가 완전히 회복된 키는 처음 보는 키와 같으므로 지워도 동작 동일

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use tokio::task::JoinHandle;

use crate::error::ApiError;
use crate::AppState;

pub type IpRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// IP당 분당 `per_minute`회 (최소 1)
pub fn ip_rate_limiter(per_minute: u32) -> Arc<IpRateLimiter> {
    let burst = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::keyed(Quota::per_minute(burst)))
}

/// 회복이 끝난 키를 주기적으로 제거
pub fn spawn_rate_limiter_gc(limiter: Arc<IpRateLimiter>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            limiter.retain_recent();
            limiter.shrink_to_fit();
            tracing::trace!(keys = limiter.len(), "Rate limiter state pruned");
        }
    })
}

pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(req.headers(), peer, state.config.cron.trust_proxy_headers)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if state.rate_limiter.check_key(&ip).is_err() {
        tracing::warn!(%ip, path = %req.uri().path(), "Rate limit exceeded");
        return Err(ApiError::RateLimited);
    }

    Ok(next.run(req).await)
}

/// 프록시 신뢰 시: `x-forwarded-for` 마지막 주소 → `x-real-ip` → 소켓 주소
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Option<IpAddr> {
    let peer = peer.map(|addr| addr.ip());
    if !trust_proxy {
        return peer;
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit(',').next())
        .and_then(|v| v.trim().parse().ok());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        })
        .or(peer)
}
