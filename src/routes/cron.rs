//! Cron Endpoints
//!
//! 외부 스케줄러가 주기적으로 호출. 인증과 rate limit은 라우터 레이어에서 처리.
//!
//! 락 경합은 에러가 아니라 200 + `skipped: true`.
//! 스케줄러가 실패로 보고 재시도 폭주를 일으키지 않도록.
//!
//! 잡은 별도 task에서 실행한다. 호출자가 연결을 끊어도(타임아웃 등)
//! 실행 중인 전송과 DB 기록은 끝까지 진행되고 lease도 정상 해제된다.

use std::future::Future;
use std::time::Instant;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::ApiError;
use crate::services::{DistributionSummary, JobResult, LockOutcome, RelaySummary};
use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeYieldResponse {
    pub success: bool,
    #[serde(flatten)]
    pub summary: DistributionSummary,
    pub duration_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayNoticesResponse {
    pub success: bool,
    #[serde(flatten)]
    pub summary: RelaySummary,
    pub duration_ms: u64,
}

#[derive(Serialize)]
pub struct SkippedResponse {
    pub success: bool,
    pub skipped: bool,
    pub message: String,
}

impl SkippedResponse {
    fn another_instance() -> Self {
        Self {
            success: true,
            skipped: true,
            message: "Another instance is already running".to_string(),
        }
    }
}

/// 요청 future와 분리된 task에서 실행
async fn run_detached<T, Fut>(job: Fut) -> Result<LockOutcome<T>, ApiError>
where
    T: Send + 'static,
    Fut: Future<Output = JobResult<T>> + Send + 'static,
{
    tokio::spawn(job)
        .await
        .map_err(|e| ApiError::JobFailed(format!("Job task aborted: {}", e)))?
        .map_err(ApiError::from)
}

/// GET /api/cron/distribute-yield
pub async fn distribute_yield(State(state): State<AppState>) -> Result<Response, ApiError> {
    let started = Instant::now();
    let jobs = state.jobs.clone();

    match run_detached(async move { jobs.distribute_yield().await }).await? {
        LockOutcome::Completed(summary) => Ok(Json(DistributeYieldResponse {
            success: true,
            summary,
            duration_ms: started.elapsed().as_millis() as u64,
        })
        .into_response()),
        LockOutcome::Contended => Ok(Json(SkippedResponse::another_instance()).into_response()),
    }
}

/// GET|POST /api/cron/relay-notices
pub async fn relay_notices(State(state): State<AppState>) -> Result<Response, ApiError> {
    let started = Instant::now();
    let jobs = state.jobs.clone();

    match run_detached(async move { jobs.relay_notices().await }).await? {
        LockOutcome::Completed(summary) => Ok(Json(RelayNoticesResponse {
            success: true,
            summary,
            duration_ms: started.elapsed().as_millis() as u64,
        })
        .into_response()),
        LockOutcome::Contended => Ok(Json(SkippedResponse::another_instance()).into_response()),
    }
}
