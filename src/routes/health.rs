//! Health Check Endpoint
//!
//! # Interview Q&A
//!
//! Q: Health check 엔드포인트는 왜 필요한가?
//! A: 3가지 용도
//!    1. 로드밸런서 헬스체크 (ALB, nginx)
//!    2. Kubernetes liveness/readiness probe
//!    3. 모니터링 시스템 연동 (Prometheus, Datadog)
//!
//! Q: DB뿐 아니라 RPC까지 체크하는 이유는?
//! A: "깊은 헬스체크"(deep health check) 패턴
//!    - 인덱서는 DB와 RPC 둘 중 하나만 죽어도 분배 불가
//!    - chain head를 같이 보여주면 watermark 지연도 바로 판단 가능

use std::time::Instant;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

/// Health check 응답
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: DatabaseStatus,
    pub chain: ChainStatus,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct ChainStatus {
    pub connected: bool,
    pub head_block: Option<u64>,
    /// 서명 키가 없으면 분배/relay 불가
    pub can_submit: bool,
}

/// GET /health
///
/// 서버 및 의존성 상태 확인
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // DB 연결 테스트
    let db_start = Instant::now();
    let database = match state.repo.health_check().await {
        Ok(_) => DatabaseStatus {
            connected: true,
            latency_ms: Some(db_start.elapsed().as_millis() as u64),
        },
        Err(e) => {
            tracing::warn!("Health check: database unreachable: {:#}", e);
            DatabaseStatus {
                connected: false,
                latency_ms: None,
            }
        }
    };

    let head_block = state.chain.block_number().await.ok();
    let chain = ChainStatus {
        connected: head_block.is_some(),
        head_block,
        can_submit: state.chain.can_submit(),
    };

    let healthy = database.connected && chain.connected;

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        chain,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
