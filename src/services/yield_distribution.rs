//! Yield Distribution Pipeline
//!
//! # Interview Q&A
//!
//! Q: 한 번의 실행은 어떻게 흘러가나?
//! A: 블록 구간을 청크 단위로 순차 처리
//!
//!    ```text
//!    watermark+1 ──► [chunk] ──► [chunk] ──► ... ──► min(head - confirmations, 상한)
//!                      │
//!                      ├─ get_logs(LoanRepaymentMade)
//!                      ├─ 이벤트별: 매칭 → 0 이자 skip → guard → claim → 서명 → 저장 → 전송
//!                      └─ watermark 저장 (실패 있으면 중단)
//!    ```
//!
//! Q: 전송 도중 실행이 끊기면? (요청 취소, 프로세스 종료, receipt 대기 실패)
//! A: row 상태로 어디까지 갔는지 구분
//!    - PENDING + tx_hash 없음: 전송 전에 끊김 → 오래되면(stale) 다시 claim
//!    - SUBMITTED: 서명된 트랜잭션이 저장됨 → receipt 조회
//!      - 성공: COMPLETED
//!      - revert: FAILED (다음 실행에서 새로 제출)
//!      - 없음: 저장된 raw 트랜잭션을 그대로 재전송 (같은 nonce → 중복 실행 불가)
//!
//!    어느 경우든 해결 전까지는 실패로 집계되어 watermark가 넘어가지 않는다.
//!
//! Q: 어떤 에러가 실행 전체를 중단시키나?
//! A: RPC 스캔 실패, DB 에러, signer 미설정
//!    - 개별 distributeYield 실패(revert 등)는 이벤트 단위 실패로 기록하고 계속

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::config::IndexerSettings;
use crate::db::{DistributionStatus, IndexerRepository, NewDistribution, YieldDistribution};
use crate::services::chain::{ChainClient, RepaymentEvent, SignedTx, TxStatus, YieldSubmission};
use crate::services::ledger::LedgerMatcher;
use crate::services::watermark::BatchProgress;
use crate::types::{BlockRange, IndexerStream};

const STREAM: IndexerStream = IndexerStream::YieldDistribution;

/// 이보다 오래된 미전송 PENDING row는 중단된 실행의 흔적으로 보고 다시 claim
pub const DEFAULT_STALE_CLAIM_AFTER: Duration = Duration::from_secs(300);

/// 이벤트 하나의 처리 결과
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Distributed { tx_hash: String },
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnknownLoan,
    ZeroInterest,
    AlreadyProcessed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedEvent {
    pub block_number: u64,
    pub loan_application_id: String,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventError {
    pub block_number: u64,
    pub loan_id: String,
    pub error: String,
}

/// 응답의 `results` 필드
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionResults {
    pub processed: usize,
    pub distributed: usize,
    pub skipped: usize,
    pub skipped_unknown_loan: usize,
    pub skipped_zero_interest: usize,
    pub skipped_already_processed: usize,
    pub failed: usize,
    pub distributions: Vec<DistributedEvent>,
    pub errors: Vec<EventError>,
}

impl DistributionResults {
    fn record(&mut self, event: &RepaymentEvent, loan_application_id: Option<&str>, outcome: &EventOutcome) {
        self.processed += 1;
        match outcome {
            EventOutcome::Distributed { tx_hash } => {
                self.distributed += 1;
                self.distributions.push(DistributedEvent {
                    block_number: event.block_number,
                    loan_application_id: loan_application_id.unwrap_or_default().to_string(),
                    tx_hash: tx_hash.clone(),
                });
            }
            EventOutcome::Skipped(reason) => {
                self.skipped += 1;
                match reason {
                    SkipReason::UnknownLoan => self.skipped_unknown_loan += 1,
                    SkipReason::ZeroInterest => self.skipped_zero_interest += 1,
                    SkipReason::AlreadyProcessed => self.skipped_already_processed += 1,
                }
            }
            EventOutcome::Failed(error) => {
                self.failed += 1;
                self.errors.push(EventError {
                    block_number: event.block_number,
                    loan_id: event.loan_id.to_string(),
                    error: error.clone(),
                });
            }
        }
    }
}

/// 한 번의 실행 요약
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_block: Option<u64>,
    pub watermark: Option<u64>,
    pub results: DistributionResults,
}

pub struct YieldDistributor {
    repo: Arc<dyn IndexerRepository>,
    chain: Arc<dyn ChainClient>,
    settings: IndexerSettings,
    stale_claim_after: Duration,
}

impl YieldDistributor {
    pub fn new(
        repo: Arc<dyn IndexerRepository>,
        chain: Arc<dyn ChainClient>,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            repo,
            chain,
            settings,
            stale_claim_after: DEFAULT_STALE_CLAIM_AFTER,
        }
    }

    /// 락 TTL보다 짧으면 살아 있는 실행의 claim을 가로챌 수 있음
    pub fn with_stale_claim_after(mut self, after: Duration) -> Self {
        self.stale_claim_after = after;
        self
    }

    /// 이번 실행의 스캔 구간. 따라잡은 상태면 None
    async fn scan_range(&self, watermark: Option<u64>) -> Result<Option<BlockRange>> {
        let head = self
            .chain
            .block_number()
            .await
            .context("Failed to fetch chain head")?;
        let safe_head = head.saturating_sub(self.settings.confirmations);

        let from = match watermark {
            Some(last) => last.saturating_add(1),
            None => self.settings.start_block,
        };

        let chunk_size = self.settings.chunk_size.max(1);
        let max_blocks = chunk_size.saturating_mul(self.settings.max_chunks_per_run.max(1));
        let to = safe_head.min(from.saturating_add(max_blocks - 1));

        Ok(BlockRange::new(from, to))
    }

    pub async fn run(&self) -> Result<DistributionSummary> {
        if !self.chain.can_submit() {
            bail!("RELAYER_PRIVATE_KEY is not configured, cannot distribute yield");
        }

        let stored = self
            .repo
            .get_watermark(STREAM)
            .await
            .context("Failed to read yield watermark")?;

        let mut results = DistributionResults::default();

        let Some(range) = self.scan_range(stored).await? else {
            tracing::debug!(watermark = ?stored, "Yield distribution is up to date");
            return Ok(DistributionSummary {
                from_block: None,
                to_block: None,
                watermark: stored,
                results,
            });
        };

        tracing::info!(from = range.start, to = range.end, blocks = range.len(), "📦 Scanning repayment events");

        let matcher = LedgerMatcher::load(self.repo.as_ref()).await?;
        let mut watermark = stored;

        for chunk in range.chunks(self.settings.chunk_size) {
            let events = self
                .chain
                .repayment_events(chunk)
                .await
                .with_context(|| format!("Failed to scan repayment events in {}", chunk))?;

            let mut progress = BatchProgress::new();

            for event in &events {
                let loan = matcher.lookup(&event.loan_id);
                let outcome = self.process_event(event, &matcher).await?;

                match &outcome {
                    EventOutcome::Failed(_) => progress.record_failed(event.block_number),
                    _ => progress.record_resolved(event.block_number),
                }
                results.record(event, loan.map(|l| l.loan_application_id.as_str()), &outcome);
            }

            let next = progress.next_watermark(watermark, chunk.end);
            if let Some(value) = next.filter(|n| Some(*n) > watermark) {
                let persisted = self
                    .repo
                    .advance_watermark(STREAM, value)
                    .await
                    .context("Failed to persist yield watermark")?;
                watermark = Some(persisted);
            }

            if progress.has_failures() {
                tracing::warn!(
                    chunk = %chunk,
                    first_failure = ?progress.first_failure(),
                    watermark = ?watermark,
                    "Chunk had failed distributions, stopping this run"
                );
                break;
            }
        }

        tracing::info!(
            processed = results.processed,
            distributed = results.distributed,
            skipped = results.skipped,
            failed = results.failed,
            watermark = ?watermark,
            "✅ Yield distribution run finished"
        );

        Ok(DistributionSummary {
            from_block: Some(range.start),
            to_block: Some(range.end),
            watermark,
            results,
        })
    }

    /// 이벤트 하나 처리. Err는 DB 에러 (실행 중단)
    async fn process_event(&self, event: &RepaymentEvent, matcher: &LedgerMatcher) -> Result<EventOutcome> {
        let Some(loan) = matcher.lookup(&event.loan_id) else {
            tracing::debug!(block = event.block_number, loan_id = %event.loan_id, "Repayment for untracked loan, skipping");
            return Ok(EventOutcome::Skipped(SkipReason::UnknownLoan));
        };

        if event.interest_amount.is_zero() {
            tracing::debug!(block = event.block_number, loan = %loan.loan_application_id, "Zero interest repayment, skipping");
            return Ok(EventOutcome::Skipped(SkipReason::ZeroInterest));
        }

        let existing = self
            .repo
            .find_distribution(event.block_number, &loan.loan_application_id)
            .await?;

        if let Some(row) = existing {
            match row.status() {
                Some(DistributionStatus::Completed) => {
                    return Ok(EventOutcome::Skipped(SkipReason::AlreadyProcessed));
                }
                Some(DistributionStatus::Submitted) => return self.reconcile(&row).await,
                Some(DistributionStatus::Pending) if !row.is_stale(self.stale_claim_after) => {
                    return Ok(EventOutcome::Failed(
                        "Distribution is claimed by another run and not yet submitted".to_string(),
                    ));
                }
                Some(DistributionStatus::Pending | DistributionStatus::Failed) => {
                    tracing::info!(
                        block = event.block_number,
                        loan = %loan.loan_application_id,
                        status = %row.status,
                        "Retrying distribution"
                    );
                }
                None => {
                    return Ok(EventOutcome::Failed(format!(
                        "Unknown distribution status {}",
                        row.status
                    )));
                }
            }
        }

        let principal = event.principal_amount();
        let claimed = self
            .repo
            .claim_distribution(
                &NewDistribution {
                    source_block_number: event.block_number,
                    loan_application_id: loan.loan_application_id.clone(),
                    pool_id: loan.pool_id.clone(),
                    interest_amount: event.interest_amount.to_string(),
                    principal_amount: principal.to_string(),
                },
                self.stale_claim_after,
            )
            .await?;

        // 동시 실행이 먼저 claim함. 결과를 모르므로 해결된 것으로 보지 않음
        if !claimed {
            return Ok(EventOutcome::Failed(
                "Distribution was claimed by a concurrent run".to_string(),
            ));
        }

        let submission = YieldSubmission {
            pool_contract: loan.pool_contract_address.clone(),
            interest_amount: event.interest_amount,
            loan_id: event.loan_id,
            principal_amount: principal,
            source_block: event.block_number,
        };

        let signed = match self.chain.sign_distribute_yield(&submission).await {
            Ok(signed) => signed,
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::error!(
                    block = event.block_number,
                    loan = %loan.loan_application_id,
                    error = %message,
                    "Failed to sign distributeYield"
                );
                self.repo
                    .fail_distribution(event.block_number, &loan.loan_application_id, &message)
                    .await?;
                return Ok(EventOutcome::Failed(message));
            }
        };

        self.repo
            .record_distribution_submission(
                event.block_number,
                &loan.loan_application_id,
                &signed.hash,
                &signed.raw_hex(),
            )
            .await?;

        self.broadcast(event.block_number, &loan.loan_application_id, &signed).await
    }

    /// SUBMITTED row를 receipt와 대조
    async fn reconcile(&self, row: &YieldDistribution) -> Result<EventOutcome> {
        let block = row.source_block_number as u64;
        let loan_application_id = row.loan_application_id.as_str();

        let (Some(tx_hash), Some(raw)) = (row.tx_hash.as_deref(), row.signed_tx.as_deref()) else {
            return Ok(EventOutcome::Failed(
                "Submitted distribution has no stored transaction".to_string(),
            ));
        };

        let status = match self.chain.transaction_status(tx_hash).await {
            Ok(status) => status,
            Err(e) => return Ok(EventOutcome::Failed(format!("{:#}", e))),
        };

        match status {
            TxStatus::Confirmed => {
                self.repo
                    .complete_distribution(block, loan_application_id, tx_hash)
                    .await?;
                tracing::info!(block, loan = %loan_application_id, tx = %tx_hash, "Earlier distribution confirmed");
                Ok(EventOutcome::Distributed { tx_hash: tx_hash.to_string() })
            }
            TxStatus::Reverted => {
                let message = format!("Transaction {} reverted", tx_hash);
                self.repo
                    .fail_distribution(block, loan_application_id, &message)
                    .await?;
                Ok(EventOutcome::Failed(message))
            }
            TxStatus::Unknown => {
                let signed = match SignedTx::from_stored(tx_hash, raw) {
                    Ok(signed) => signed,
                    Err(e) => return Ok(EventOutcome::Failed(format!("{:#}", e))),
                };
                tracing::info!(block, loan = %loan_application_id, tx = %tx_hash, "No receipt yet, rebroadcasting stored transaction");
                self.broadcast(block, loan_application_id, &signed).await
            }
        }
    }

    /// 전송 결과 반영. 결과를 모르면 SUBMITTED 그대로 둠
    async fn broadcast(&self, block: u64, loan_application_id: &str, signed: &SignedTx) -> Result<EventOutcome> {
        match self.chain.send_signed(signed).await {
            Ok(()) => {
                self.repo
                    .complete_distribution(block, loan_application_id, &signed.hash)
                    .await?;
                tracing::info!(block, loan = %loan_application_id, tx = %signed.hash, "Yield distributed");
                Ok(EventOutcome::Distributed { tx_hash: signed.hash.clone() })
            }
            Err(e) => {
                let message = e.to_string();
                if e.is_definitive() {
                    tracing::error!(block, loan = %loan_application_id, error = %message, "distributeYield failed");
                    self.repo
                        .fail_distribution(block, loan_application_id, &message)
                        .await?;
                } else {
                    tracing::warn!(block, loan = %loan_application_id, error = %message, "distributeYield outcome unknown, will check receipt next run");
                }
                Ok(EventOutcome::Failed(message))
            }
        }
    }
}
