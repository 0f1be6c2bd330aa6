//! Error Handling Module
//!
//! Provides type-safe error handling with proper HTTP status code mapping.
//! Uses thiserror for domain errors and integrates with tracing for structured logging.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::LockError;

/// API 에러 타입
///
/// # Design Decision
///
/// cron 호출자는 사람이 아니라 스케줄러이므로 응답 형태를 하나로 통일:
/// `{ "success": false, "error": "...", "code": "..." }`
///
/// - 401: 시크릿 누락/불일치 또는 CRON_SECRET 미설정
/// - 429: IP rate limit 초과 (다음 tick에서 재시도)
/// - 500: 실행 전체가 중단된 경우 (RPC 불가, DB 오류, 락 백엔드 장애 등)
#[derive(Debug, Error)]
pub enum ApiError {
    // ============ 401 Unauthorized ============
    #[error("Authentication required")]
    Unauthorized,

    #[error("Cron endpoints are disabled")]
    CronDisabled,

    // ============ 429 Too Many Requests ============
    #[error("Rate limit exceeded")]
    RateLimited,

    // ============ 500 Internal Server Error ============
    #[error("Job failed: {0}")]
    JobFailed(String),
}

/// API 에러 응답 구조
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized".to_string(),
            ),
            ApiError::CronDisabled => {
                tracing::warn!("Cron request rejected: CRON_SECRET is not configured");
                (
                    StatusCode::UNAUTHORIZED,
                    "CRON_DISABLED",
                    "Cron endpoints are not configured".to_string(),
                )
            }
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Rate limit exceeded. Please try again later.".to_string(),
            ),

            // 잡 실패 메시지는 그대로 노출 (호출자는 운영자 cron)
            ApiError::JobFailed(msg) => {
                tracing::error!(error = %msg, "Cron job failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "JOB_FAILED",
                    msg.clone(),
                )
            }
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// anyhow 에러는 잡 실패로 변환 (체인 포함 메시지 유지)
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::JobFailed(format!("{:#}", err))
    }
}

/// 락 백엔드 장애와 잡 실패 모두 500이지만 메시지로 구분
impl From<LockError<anyhow::Error>> for ApiError {
    fn from(err: LockError<anyhow::Error>) -> Self {
        match err {
            LockError::Backend(_) => ApiError::JobFailed(err.to_string()),
            LockError::Task(e) => e.into(),
        }
    }
}
