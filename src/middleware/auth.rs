//! Cron Bearer Authentication
//!
//! # Interview Q&A
//!
//! Q: CRON_SECRET이 없으면 왜 401인가? (통과가 아니라)
//! A: 설정 누락이 곧 공개 엔드포인트가 되면 안 됨
//!    - 누구나 가스를 쓰는 트랜잭션을 유발할 수 있음
//!    - 설정이 없으면 cron 자체를 비활성화된 것으로 취급
//!
//! Q: 문자열 비교를 왜 상수 시간으로 하나?
//! A: `==`는 첫 불일치 바이트에서 멈춤 → 응답 시간으로 접두사 추측 가능

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::AppState;

pub async fn require_cron_secret(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(secret) = state.config.cron.secret.as_deref() else {
        return Err(ApiError::CronDisabled);
    };

    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match token {
        Some(token) if constant_time_compare(token.as_bytes(), secret.as_bytes()) => {
            Ok(next.run(req).await)
        }
        _ => {
            tracing::warn!(path = %req.uri().path(), "Rejected cron request with missing or invalid bearer");
            Err(ApiError::Unauthorized)
        }
    }
}

/// 길이가 같으면 모든 바이트를 비교
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(b"s3cret", b"s3cret"));
        assert!(!constant_time_compare(b"s3cret", b"s3creT"));
        assert!(!constant_time_compare(b"s3cret", b"s3cre"));
        assert!(constant_time_compare(b"", b""));
    }
}
