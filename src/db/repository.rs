//! Repository Pattern Implementation
//!
//! # Interview Q&A
//!
//! Q: Repository 패턴이란?
//! A: 데이터 접근 로직을 추상화하는 패턴
//!
//!    장점:
//!    - 비즈니스 로직(인덱서 파이프라인)과 데이터 접근 분리
//!    - 테스트 시 Mock 구현 쉬움 → 파이프라인 테스트에 Postgres 불필요
//!    - DB 교체 시 영향 최소화
//!
//! Q: 멱등성은 어디서 보장되는가?
//! A: 세 단계
//!    1. guard: `find_distribution`으로 기존 row 확인
//!       → COMPLETED면 skip, SUBMITTED면 receipt 대조
//!    2. claim: `claim_distribution`이 유니크 키 위에서 원자적으로 insert
//!       → 동시에 두 실행이 같은 (block, loan)에 도달해도 한쪽만 true
//!    3. 전송 전 기록: 서명된 트랜잭션 hash를 먼저 저장 (SUBMITTED)
//!       → 전송 결과를 모르더라도 같은 트랜잭션만 다시 보냄
//!
//!    다시 claim 가능한 row:
//!    - FAILED
//!    - tx_hash 없는 PENDING 중 `stale_after`보다 오래된 것 (중단된 실행)

use std::time::Duration;

use async_trait::async_trait;
use anyhow::Result;

use super::models::{
    DscrCalculationLog, IndexerWatermark, LoanRecord, NewDistribution, NewDscrLog,
    NewRateChange, YieldDistribution,
};
use crate::types::IndexerStream;

/// 인덱서 저장소 인터페이스
///
/// PostgreSQL 구현은 db/mod.rs의 `Database`에 있음
#[async_trait]
pub trait IndexerRepository: Send + Sync {
    async fn health_check(&self) -> Result<()>;

    // ============ Watermark ============

    async fn get_watermark(&self, stream: IndexerStream) -> Result<Option<u64>>;

    /// `GREATEST(기존, value)`로 저장하고 저장된 값 반환 (단조 증가)
    async fn advance_watermark(&self, stream: IndexerStream, value: u64) -> Result<u64>;

    async fn list_watermarks(&self) -> Result<Vec<IndexerWatermark>>;

    // ============ Ledger ============

    /// ACTIVE / DISBURSED 대출 전체 (단일 쿼리)
    async fn load_active_loans(&self) -> Result<Vec<LoanRecord>>;

    // ============ Yield Distribution ============

    async fn find_distribution(
        &self,
        source_block: u64,
        loan_application_id: &str,
    ) -> Result<Option<YieldDistribution>>;

    /// PENDING으로 claim. FAILED 또는 오래된 미전송 PENDING만 재claim
    async fn claim_distribution(&self, new: &NewDistribution, stale_after: Duration) -> Result<bool>;

    /// 전송 직전: 서명된 트랜잭션 저장 → SUBMITTED
    async fn record_distribution_submission(
        &self,
        source_block: u64,
        loan_application_id: &str,
        tx_hash: &str,
        signed_tx: &str,
    ) -> Result<()>;

    async fn complete_distribution(
        &self,
        source_block: u64,
        loan_application_id: &str,
        tx_hash: &str,
    ) -> Result<()>;

    async fn fail_distribution(
        &self,
        source_block: u64,
        loan_application_id: &str,
        error: &str,
    ) -> Result<()>;

    // ============ DSCR Relay ============

    async fn find_dscr_log(
        &self,
        input_index: u64,
        notice_index: u64,
    ) -> Result<Option<DscrCalculationLog>>;

    async fn claim_dscr_log(&self, new: &NewDscrLog, stale_after: Duration) -> Result<bool>;

    async fn record_dscr_submission(
        &self,
        input_index: u64,
        notice_index: u64,
        tx_hash: &str,
        signed_tx: &str,
    ) -> Result<()>;

    async fn complete_dscr_log(
        &self,
        input_index: u64,
        notice_index: u64,
        tx_hash: &str,
    ) -> Result<()>;

    async fn fail_dscr_log(&self, input_index: u64, notice_index: u64, error: &str) -> Result<()>;

    /// 해석 불가 notice를 REJECTED로 기록 (재시도 없음). 이미 row가 있으면 false
    async fn reject_dscr_notice(&self, input_index: u64, notice_index: u64, reason: &str) -> Result<bool>;

    /// 이미 같은 (loan, input) 제안이 있으면 false
    async fn create_rate_change(&self, change: &NewRateChange) -> Result<bool>;
}

// 테스트용 Mock 구현:
