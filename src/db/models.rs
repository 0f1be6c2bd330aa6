//! Database Models
//!
//! Off-chain ledger rows the indexer reads and writes.
//! Token amounts are uint256 on-chain, so they are stored as NUMERIC(78, 0)
//! and carried as decimal strings in Rust.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// 추적 중인 대출 + 풀 정보 (ACTIVE / DISBURSED 만 로드)
#[derive(Debug, Clone, FromRow)]
pub struct LoanRecord {
    pub loan_application_id: String,
    pub status: String,
    pub pool_id: String,
    /// distributeYield를 호출할 풀 컨트랙트
    pub pool_contract_address: String,
}

/// Yield 분배 기록
///
/// `(source_block_number, loan_application_id)` 유니크 → 멱등성 보장
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldDistribution {
    pub id: i64,
    pub source_block_number: i64,
    pub loan_application_id: String,
    pub pool_id: String,
    pub interest_amount: String,
    pub principal_amount: String,
    pub tx_hash: Option<String>,
    /// 전송 전에 저장한 서명 트랜잭션 (0x hex). 재전송 시 그대로 사용
    #[serde(skip_serializing)]
    pub signed_tx: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl YieldDistribution {
    pub fn status(&self) -> Option<DistributionStatus> {
        self.status.parse().ok()
    }

    /// 마지막 갱신 이후 `after` 이상 지났는지
    pub fn is_stale(&self, after: Duration) -> bool {
        is_older_than(self.updated_at, after)
    }
}

/// 새 분배 claim 요청
#[derive(Debug, Clone)]
pub struct NewDistribution {
    pub source_block_number: u64,
    pub loan_application_id: String,
    pub pool_id: String,
    pub interest_amount: String,
    pub principal_amount: String,
}

/// 분배 상태
///
/// ```text
/// PENDING ──sign──► SUBMITTED ──receipt ok──► COMPLETED
///    │                  │
///    │                  ├─ revert / 노드 거부 ──► FAILED ──re-claim──► PENDING
///    │                  └─ 결과 불명 → SUBMITTED 유지, 다음 실행에서 receipt 대조
///    └─ 서명 실패 ──► FAILED
/// ```
///
/// PENDING은 아직 트랜잭션이 서명/저장되지 않은 상태라 전송된 적이 없다.
/// 오래된 PENDING(중단된 실행의 잔재)은 다시 claim 가능.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionStatus {
    Pending,
    Submitted,
    Completed,
    Failed,
}

impl DistributionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionStatus::Pending => "PENDING",
            DistributionStatus::Submitted => "SUBMITTED",
            DistributionStatus::Completed => "COMPLETED",
            DistributionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DistributionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(DistributionStatus::Pending),
            "SUBMITTED" => Ok(DistributionStatus::Submitted),
            "COMPLETED" => Ok(DistributionStatus::Completed),
            "FAILED" => Ok(DistributionStatus::Failed),
            other => Err(format!("unknown distribution status: {other}")),
        }
    }
}

/// 인덱서 watermark
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerWatermark {
    pub stream: String,
    pub last_processed: i64,
    pub updated_at: DateTime<Utc>,
}

/// DSCR 계산 결과 relay 로그
///
/// `(input_index, notice_index)` 유니크
#[derive(Debug, Clone, FromRow)]
pub struct DscrCalculationLog {
    pub id: i64,
    pub input_index: i64,
    pub notice_index: i64,
    /// REJECTED row는 payload를 해석하지 못했으므로 비어 있음
    pub loan_application_id: Option<String>,
    /// DSCR * 10_000
    pub dscr_bps: Option<i64>,
    pub proof_hash: Option<String>,
    pub tx_hash: Option<String>,
    pub signed_tx: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DscrCalculationLog {
    pub fn status(&self) -> Option<RelayStatus> {
        self.status.parse().ok()
    }

    pub fn is_stale(&self, after: Duration) -> bool {
        is_older_than(self.updated_at, after)
    }
}

/// 새 DSCR relay claim 요청
#[derive(Debug, Clone)]
pub struct NewDscrLog {
    pub input_index: u64,
    pub notice_index: u64,
    pub loan_application_id: String,
    pub dscr_bps: u64,
    pub proof_hash: Option<String>,
}

/// DSCR relay 상태
///
/// 분배와 같은 PENDING → SUBMITTED → RELAYED | FAILED 흐름에
/// REJECTED(해석 불가 payload, 재시도 없음)가 추가됨
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    Pending,
    Submitted,
    Relayed,
    Failed,
    Rejected,
}

impl RelayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStatus::Pending => "PENDING",
            RelayStatus::Submitted => "SUBMITTED",
            RelayStatus::Relayed => "RELAYED",
            RelayStatus::Failed => "FAILED",
            RelayStatus::Rejected => "REJECTED",
        }
    }
}

impl FromStr for RelayStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RelayStatus::Pending),
            "SUBMITTED" => Ok(RelayStatus::Submitted),
            "RELAYED" => Ok(RelayStatus::Relayed),
            "FAILED" => Ok(RelayStatus::Failed),
            "REJECTED" => Ok(RelayStatus::Rejected),
            other => Err(format!("unknown relay status: {other}")),
        }
    }
}

/// DSCR 결과에서 파생된 금리 변경 제안 (관리자 승인 대기)
#[derive(Debug, Clone)]
pub struct NewRateChange {
    pub loan_application_id: String,
    pub current_rate_bps: Option<u64>,
    pub proposed_rate_bps: u64,
    pub source_input_index: u64,
    pub reason: String,
}

fn is_older_than(updated_at: DateTime<Utc>, after: Duration) -> bool {
    // 미래 시각(시계 차이)은 음수 → to_std 실패 → stale 아님
    Utc::now()
        .signed_duration_since(updated_at)
        .to_std()
        .map_or(false, |age| age >= after)
}
