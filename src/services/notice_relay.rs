//! DSCR Notice Relay
//!
//! rollup에서 검증된 DSCR 결과(notice)를 온체인 oracle로 전달.
//! 커서는 rollup input index이며 watermark와 같은 규칙으로 전진한다.
//!
//! input 하나에 notice가 여러 개일 수 있으므로, input은 모든 notice가
//! relay, skip 또는 reject 되었을 때만 해결된 것으로 본다.
//!
//! 필드가 잘못된 `dscr_result`는 재시도해도 결과가 같으므로 REJECTED로
//! 기록하고 넘어간다. 전송 흐름(서명 → SUBMITTED 저장 → 전송 → receipt 대조)은
//! yield 분배와 같다.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::db::{DscrCalculationLog, IndexerRepository, NewDscrLog, NewRateChange, RelayStatus};
use crate::services::chain::{ChainClient, DscrRelay, SignedTx, TxStatus};
use crate::services::yield_distribution::DEFAULT_STALE_CLAIM_AFTER;
use crate::services::notice::{decode_notice, DecodedNotice, DscrResult, NoticeDecodeError, NoticeSource, RollupNotice};
use crate::services::watermark::BatchProgress;
use crate::types::{IndexerStream, LoanKey};

const STREAM: IndexerStream = IndexerStream::NoticeRelay;

#[derive(Debug, Clone, PartialEq)]
pub enum NoticeOutcome {
    Relayed { tx_hash: String },
    Skipped,
    /// 해석할 수 없는 dscr_result. 해결된 것으로 봄
    Rejected(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeError {
    pub input_index: u64,
    pub notice_index: u64,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySummary {
    pub relayed_count: usize,
    pub skipped_count: usize,
    pub rejected_count: usize,
    pub failed_count: usize,
    pub rate_changes_proposed: usize,
    pub inputs_scanned: usize,
    pub cursor: Option<u64>,
    pub errors: Vec<NoticeError>,
    pub rejections: Vec<NoticeError>,
}

pub struct NoticeRelay {
    repo: Arc<dyn IndexerRepository>,
    chain: Arc<dyn ChainClient>,
    source: Arc<dyn NoticeSource>,
    page_size: u32,
    stale_claim_after: Duration,
}

impl NoticeRelay {
    pub fn new(
        repo: Arc<dyn IndexerRepository>,
        chain: Arc<dyn ChainClient>,
        source: Arc<dyn NoticeSource>,
        page_size: u32,
    ) -> Self {
        Self {
            repo,
            chain,
            source,
            page_size: page_size.max(1),
            stale_claim_after: DEFAULT_STALE_CLAIM_AFTER,
        }
    }

    pub fn with_stale_claim_after(mut self, after: Duration) -> Self {
        self.stale_claim_after = after;
        self
    }

    pub async fn run(&self) -> Result<RelaySummary> {
        if !self.chain.can_submit() {
            bail!("RELAYER_PRIVATE_KEY is not configured, cannot relay notices");
        }

        let stored = self
            .repo
            .get_watermark(STREAM)
            .await
            .context("Failed to read notice cursor")?;

        let inputs = self
            .source
            .fetch_inputs_after(stored, self.page_size)
            .await
            .context("Failed to fetch rollup notices")?;

        let mut summary = RelaySummary {
            cursor: stored,
            inputs_scanned: inputs.len(),
            ..Default::default()
        };
        let mut progress = BatchProgress::new();

        for input in &inputs {
            let mut input_failed = false;

            for notice in &input.notices {
                match self.process_notice(input.index, notice, &mut summary).await? {
                    NoticeOutcome::Relayed { .. } => summary.relayed_count += 1,
                    NoticeOutcome::Skipped => summary.skipped_count += 1,
                    NoticeOutcome::Rejected(reason) => {
                        summary.rejected_count += 1;
                        summary.rejections.push(NoticeError {
                            input_index: input.index,
                            notice_index: notice.index,
                            error: reason,
                        });
                    }
                    NoticeOutcome::Failed(error) => {
                        summary.failed_count += 1;
                        input_failed = true;
                        summary.errors.push(NoticeError {
                            input_index: input.index,
                            notice_index: notice.index,
                            error,
                        });
                    }
                }
            }

            if input_failed {
                progress.record_failed(input.index);
            } else {
                progress.record_resolved(input.index);
            }

            // input마다 저장: 중간에 중단돼도 해결된 input은 다시 보지 않음
            let next = progress.next_watermark(summary.cursor, input.index);
            if let Some(value) = next.filter(|n| Some(*n) > summary.cursor) {
                let persisted = self
                    .repo
                    .advance_watermark(STREAM, value)
                    .await
                    .context("Failed to persist notice cursor")?;
                summary.cursor = Some(persisted);
            }
        }

        tracing::info!(
            inputs = summary.inputs_scanned,
            relayed = summary.relayed_count,
            skipped = summary.skipped_count,
            rejected = summary.rejected_count,
            failed = summary.failed_count,
            cursor = ?summary.cursor,
            "✅ Notice relay run finished"
        );

        Ok(summary)
    }

    /// notice 하나 처리. Err는 DB 에러 (실행 중단)
    async fn process_notice(
        &self,
        input_index: u64,
        notice: &RollupNotice,
        summary: &mut RelaySummary,
    ) -> Result<NoticeOutcome> {
        let result = match decode_notice(&notice.payload) {
            Ok(DecodedNotice::Dscr(result)) => result,
            Ok(DecodedNotice::Ignored { notice_type }) => {
                tracing::debug!(input_index, notice_index = notice.index, notice_type = ?notice_type, "Ignoring notice");
                return Ok(NoticeOutcome::Skipped);
            }
            // JSON이 아니면 판별 불가 → 다른 용도의 notice로 간주
            Err(e @ (NoticeDecodeError::InvalidHex(_) | NoticeDecodeError::InvalidJson(_))) => {
                tracing::warn!(input_index, notice_index = notice.index, error = %e, "Undecodable notice payload, ignoring");
                return Ok(NoticeOutcome::Skipped);
            }
            Err(e @ NoticeDecodeError::InvalidField { .. }) => {
                let reason = e.to_string();
                tracing::warn!(input_index, notice_index = notice.index, error = %reason, "Rejecting malformed DSCR notice");
                self.repo
                    .reject_dscr_notice(input_index, notice.index, &reason)
                    .await?;
                return Ok(NoticeOutcome::Rejected(reason));
            }
        };

        if let Some(existing) = self.repo.find_dscr_log(input_index, notice.index).await? {
            match existing.status() {
                Some(RelayStatus::Relayed | RelayStatus::Rejected) => return Ok(NoticeOutcome::Skipped),
                Some(RelayStatus::Submitted) => {
                    return self.reconcile(&existing, &result, summary).await;
                }
                Some(RelayStatus::Pending) if !existing.is_stale(self.stale_claim_after) => {
                    return Ok(NoticeOutcome::Failed(
                        "Notice is claimed by another run and not yet submitted".to_string(),
                    ));
                }
                Some(RelayStatus::Pending | RelayStatus::Failed) => {}
                None => {
                    return Ok(NoticeOutcome::Failed(format!(
                        "Unknown relay status {}",
                        existing.status
                    )));
                }
            }
        }

        let claimed = self
            .repo
            .claim_dscr_log(
                &NewDscrLog {
                    input_index,
                    notice_index: notice.index,
                    loan_application_id: result.loan_application_id.clone(),
                    dscr_bps: result.dscr_bps,
                    proof_hash: result.proof_hash.map(|h| format!("0x{}", hex::encode(h))),
                },
                self.stale_claim_after,
            )
            .await?;

        if !claimed {
            return Ok(NoticeOutcome::Failed(
                "Notice was claimed by a concurrent run".to_string(),
            ));
        }

        let relay = DscrRelay {
            loan_id: LoanKey::from_application_id(&result.loan_application_id),
            dscr_bps: result.dscr_bps,
            proof_hash: result.proof_hash.unwrap_or([0u8; 32]),
        };

        let signed = match self.chain.sign_record_dscr(&relay).await {
            Ok(signed) => signed,
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::error!(input_index, notice_index = notice.index, error = %message, "Failed to sign recordDscr");
                self.repo
                    .fail_dscr_log(input_index, notice.index, &message)
                    .await?;
                return Ok(NoticeOutcome::Failed(message));
            }
        };

        self.repo
            .record_dscr_submission(input_index, notice.index, &signed.hash, &signed.raw_hex())
            .await?;

        self.broadcast(input_index, notice.index, &result, &signed, summary).await
    }

    /// SUBMITTED row를 receipt와 대조
    async fn reconcile(
        &self,
        row: &DscrCalculationLog,
        result: &DscrResult,
        summary: &mut RelaySummary,
    ) -> Result<NoticeOutcome> {
        let input_index = row.input_index as u64;
        let notice_index = row.notice_index as u64;

        let (Some(tx_hash), Some(raw)) = (row.tx_hash.as_deref(), row.signed_tx.as_deref()) else {
            return Ok(NoticeOutcome::Failed(
                "Submitted notice has no stored transaction".to_string(),
            ));
        };

        let status = match self.chain.transaction_status(tx_hash).await {
            Ok(status) => status,
            Err(e) => return Ok(NoticeOutcome::Failed(format!("{:#}", e))),
        };

        match status {
            TxStatus::Confirmed => {
                self.finish(input_index, notice_index, result, tx_hash, summary).await
            }
            TxStatus::Reverted => {
                let message = format!("Transaction {} reverted", tx_hash);
                self.repo
                    .fail_dscr_log(input_index, notice_index, &message)
                    .await?;
                Ok(NoticeOutcome::Failed(message))
            }
            TxStatus::Unknown => {
                let signed = match SignedTx::from_stored(tx_hash, raw) {
                    Ok(signed) => signed,
                    Err(e) => return Ok(NoticeOutcome::Failed(format!("{:#}", e))),
                };
                tracing::info!(input_index, notice_index, tx = %tx_hash, "No receipt yet, rebroadcasting stored transaction");
                self.broadcast(input_index, notice_index, result, &signed, summary).await
            }
        }
    }

    async fn broadcast(
        &self,
        input_index: u64,
        notice_index: u64,
        result: &DscrResult,
        signed: &SignedTx,
        summary: &mut RelaySummary,
    ) -> Result<NoticeOutcome> {
        match self.chain.send_signed(signed).await {
            Ok(()) => self.finish(input_index, notice_index, result, &signed.hash, summary).await,
            Err(e) => {
                let message = e.to_string();
                if e.is_definitive() {
                    tracing::error!(input_index, notice_index, error = %message, "recordDscr failed");
                    self.repo
                        .fail_dscr_log(input_index, notice_index, &message)
                        .await?;
                } else {
                    tracing::warn!(input_index, notice_index, error = %message, "recordDscr outcome unknown, will check receipt next run");
                }
                Ok(NoticeOutcome::Failed(message))
            }
        }
    }

    /// RELAYED 기록 후 금리 변경 제안
    async fn finish(
        &self,
        input_index: u64,
        notice_index: u64,
        result: &DscrResult,
        tx_hash: &str,
        summary: &mut RelaySummary,
    ) -> Result<NoticeOutcome> {
        self.repo
            .complete_dscr_log(input_index, notice_index, tx_hash)
            .await?;
        tracing::info!(
            input_index,
            loan = %result.loan_application_id,
            dscr_bps = result.dscr_bps,
            tx = %tx_hash,
            "DSCR relayed"
        );

        if self.propose_rate_change(input_index, result).await? {
            summary.rate_changes_proposed += 1;
        }
        Ok(NoticeOutcome::Relayed { tx_hash: tx_hash.to_string() })
    }

    async fn propose_rate_change(&self, input_index: u64, result: &DscrResult) -> Result<bool> {
        let Some(proposed) = result.recommended_rate_bps else {
            return Ok(false);
        };

        if result.current_rate_bps == Some(proposed) {
            return Ok(false);
        }

        let created = self
            .repo
            .create_rate_change(&NewRateChange {
                loan_application_id: result.loan_application_id.clone(),
                current_rate_bps: result.current_rate_bps,
                proposed_rate_bps: proposed,
                source_input_index: input_index,
                reason: format!("DSCR {:.4}", result.dscr_bps as f64 / 10_000.0),
            })
            .await?;

        if created {
            tracing::info!(loan = %result.loan_application_id, proposed_bps = proposed, "Rate change proposed");
        }
        Ok(created)
    }
}
