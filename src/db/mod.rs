//! Database Module
//!
//! # Interview Q&A
//!
//! Q: 왜 PostgreSQL을 선택했는가?
//! A: 인덱서 북키핑에 적합한 이유
//!
//!    1. 유니크 제약: (block, loan) 중복 분배를 DB 레벨에서 차단
//!    2. `INSERT ... ON CONFLICT`: claim/upsert를 단일 문장으로 원자 처리
//!    3. `GREATEST()`: watermark 단조 증가를 쿼리 하나로 보장
//!    4. NUMERIC(78, 0): uint256 금액을 손실 없이 저장
//!
//! Q: 커넥션 풀은 어떻게 관리하는가?
//! A: SQLx의 PgPool 사용
//!    - cron 실행은 순차 처리라 커넥션 수요가 낮음 → max 10
//!    - acquire_timeout 3초: DB 장애 시 실행을 빠르게 중단 (fatal)

mod models;
mod repository;

pub use models::*;
pub use repository::IndexerRepository;
#[cfg(test)]
pub use repository::mock;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::types::IndexerStream;

/// 데이터베이스 연결 및 쿼리 담당
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 10
    /// - min_connections: 1 (idle 시 최소 유지)
    /// - acquire_timeout: 3초 (커넥션 획득 대기)
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await?;
        Ok(())
    }

    /// 분산 락 등 같은 풀을 공유하는 컴포넌트용
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const DISTRIBUTION_COLUMNS: &str = r#"
    id,
    source_block_number,
    loan_application_id,
    pool_id,
    interest_amount::text AS interest_amount,
    principal_amount::text AS principal_amount,
    tx_hash,
    signed_tx,
    status,
    error,
    created_at,
    updated_at
"#;

#[async_trait]
impl IndexerRepository for Database {
    /// Health check
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_watermark(&self, stream: IndexerStream) -> Result<Option<u64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT last_processed FROM indexer_watermarks WHERE stream = $1"
        )
        .bind(stream.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value,)| value as u64))
    }

    /// Watermark 전진 (upsert)
    ///
    /// GREATEST로 감소를 차단 → 겹치는 실행이 있어도 단조 증가 유지
    async fn advance_watermark(&self, stream: IndexerStream, value: u64) -> Result<u64> {
        let (stored,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO indexer_watermarks (stream, last_processed, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (stream)
            DO UPDATE SET
                last_processed = GREATEST(indexer_watermarks.last_processed, EXCLUDED.last_processed),
                updated_at = NOW()
            RETURNING last_processed
            "#
        )
        .bind(stream.as_str())
        .bind(value as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored as u64)
    }

    async fn list_watermarks(&self) -> Result<Vec<IndexerWatermark>> {
        let rows = sqlx::query_as::<_, IndexerWatermark>(
            "SELECT stream, last_processed, updated_at FROM indexer_watermarks ORDER BY stream"
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// 추적 대출 일괄 로드 (N+1 방지)
    async fn load_active_loans(&self) -> Result<Vec<LoanRecord>> {
        let loans = sqlx::query_as::<_, LoanRecord>(
            r#"
            SELECT
                l.id AS loan_application_id,
                l.status,
                p.id AS pool_id,
                p.contract_address AS pool_contract_address
            FROM loan_applications l
            JOIN lending_pools p ON p.id = l.pool_id
            WHERE l.status IN ('ACTIVE', 'DISBURSED')
            "#
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(loans)
    }

    async fn find_distribution(
        &self,
        source_block: u64,
        loan_application_id: &str,
    ) -> Result<Option<YieldDistribution>> {
        let query = format!(
            "SELECT {DISTRIBUTION_COLUMNS} FROM yield_distributions \
             WHERE source_block_number = $1 AND loan_application_id = $2"
        );
        let row = sqlx::query_as::<_, YieldDistribution>(&query)
            .bind(source_block as i64)
            .bind(loan_application_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    /// 분배 claim
    ///
    /// - 신규: INSERT → PENDING
    /// - FAILED, 또는 tx_hash 없이 `stale_after` 넘게 방치된 PENDING: 재claim
    /// - 그 외 (진행 중 PENDING, SUBMITTED, COMPLETED): RETURNING 없음 → false
    async fn claim_distribution(&self, new: &NewDistribution, stale_after: Duration) -> Result<bool> {
        let claimed: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO yield_distributions (
                source_block_number, loan_application_id, pool_id,
                interest_amount, principal_amount, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4::numeric, $5::numeric, 'PENDING', NOW(), NOW())
            ON CONFLICT (source_block_number, loan_application_id)
            DO UPDATE SET
                status = 'PENDING',
                error = NULL,
                tx_hash = NULL,
                signed_tx = NULL,
                updated_at = NOW()
            WHERE yield_distributions.status = 'FAILED'
               OR (yield_distributions.status = 'PENDING'
                   AND yield_distributions.tx_hash IS NULL
                   AND yield_distributions.updated_at <= NOW() - make_interval(secs => $6))
            RETURNING id
            "#
        )
        .bind(new.source_block_number as i64)
        .bind(&new.loan_application_id)
        .bind(&new.pool_id)
        .bind(&new.interest_amount)
        .bind(&new.principal_amount)
        .bind(stale_after.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn record_distribution_submission(
        &self,
        source_block: u64,
        loan_application_id: &str,
        tx_hash: &str,
        signed_tx: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE yield_distributions
            SET status = 'SUBMITTED', tx_hash = $3, signed_tx = $4, updated_at = NOW()
            WHERE source_block_number = $1 AND loan_application_id = $2
            "#
        )
        .bind(source_block as i64)
        .bind(loan_application_id)
        .bind(tx_hash)
        .bind(signed_tx)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_distribution(
        &self,
        source_block: u64,
        loan_application_id: &str,
        tx_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE yield_distributions
            SET status = 'COMPLETED', tx_hash = $3, error = NULL, updated_at = NOW()
            WHERE source_block_number = $1 AND loan_application_id = $2
            "#
        )
        .bind(source_block as i64)
        .bind(loan_application_id)
        .bind(tx_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_distribution(
        &self,
        source_block: u64,
        loan_application_id: &str,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE yield_distributions
            SET status = 'FAILED', error = $3, updated_at = NOW()
            WHERE source_block_number = $1 AND loan_application_id = $2
            "#
        )
        .bind(source_block as i64)
        .bind(loan_application_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_dscr_log(
        &self,
        input_index: u64,
        notice_index: u64,
    ) -> Result<Option<DscrCalculationLog>> {
        let row = sqlx::query_as::<_, DscrCalculationLog>(
            r#"
            SELECT
                id, input_index, notice_index, loan_application_id, dscr_bps,
                proof_hash, tx_hash, signed_tx, status, error, created_at, updated_at
            FROM dscr_calculation_logs
            WHERE input_index = $1 AND notice_index = $2
            "#
        )
        .bind(input_index as i64)
        .bind(notice_index as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// `claim_distribution`과 같은 재claim 조건
    async fn claim_dscr_log(&self, new: &NewDscrLog, stale_after: Duration) -> Result<bool> {
        let claimed: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO dscr_calculation_logs (
                input_index, notice_index, loan_application_id, dscr_bps,
                proof_hash, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 'PENDING', NOW(), NOW())
            ON CONFLICT (input_index, notice_index)
            DO UPDATE SET
                status = 'PENDING',
                error = NULL,
                tx_hash = NULL,
                signed_tx = NULL,
                updated_at = NOW()
            WHERE dscr_calculation_logs.status = 'FAILED'
               OR (dscr_calculation_logs.status = 'PENDING'
                   AND dscr_calculation_logs.tx_hash IS NULL
                   AND dscr_calculation_logs.updated_at <= NOW() - make_interval(secs => $6))
            RETURNING id
            "#
        )
        .bind(new.input_index as i64)
        .bind(new.notice_index as i64)
        .bind(&new.loan_application_id)
        .bind(new.dscr_bps as i64)
        .bind(&new.proof_hash)
        .bind(stale_after.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn record_dscr_submission(
        &self,
        input_index: u64,
        notice_index: u64,
        tx_hash: &str,
        signed_tx: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE dscr_calculation_logs
            SET status = 'SUBMITTED', tx_hash = $3, signed_tx = $4, updated_at = NOW()
            WHERE input_index = $1 AND notice_index = $2
            "#
        )
        .bind(input_index as i64)
        .bind(notice_index as i64)
        .bind(tx_hash)
        .bind(signed_tx)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_dscr_log(
        &self,
        input_index: u64,
        notice_index: u64,
        tx_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE dscr_calculation_logs
            SET status = 'RELAYED', tx_hash = $3, error = NULL, updated_at = NOW()
            WHERE input_index = $1 AND notice_index = $2
            "#
        )
        .bind(input_index as i64)
        .bind(notice_index as i64)
        .bind(tx_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_dscr_log(&self, input_index: u64, notice_index: u64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE dscr_calculation_logs
            SET status = 'FAILED', error = $3, updated_at = NOW()
            WHERE input_index = $1 AND notice_index = $2
            "#
        )
        .bind(input_index as i64)
        .bind(notice_index as i64)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reject_dscr_notice(&self, input_index: u64, notice_index: u64, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO dscr_calculation_logs (
                input_index, notice_index, status, error, created_at, updated_at
            )
            VALUES ($1, $2, 'REJECTED', $3, NOW(), NOW())
            ON CONFLICT (input_index, notice_index) DO NOTHING
            "#
        )
        .bind(input_index as i64)
        .bind(notice_index as i64)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 금리 변경 제안 생성 (create-once)
    async fn create_rate_change(&self, change: &NewRateChange) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO pending_rate_changes (
                loan_application_id, current_rate_bps, proposed_rate_bps,
                source_input_index, reason, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 'PENDING', NOW(), NOW())
            ON CONFLICT (loan_application_id, source_input_index) DO NOTHING
            "#
        )
        .bind(&change.loan_application_id)
        .bind(change.current_rate_bps.map(|v| v as i64))
        .bind(change.proposed_rate_bps as i64)
        .bind(change.source_input_index as i64)
        .bind(&change.reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
