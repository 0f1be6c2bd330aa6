//! Cartesi Notice Feed
//!
//! Cartesi rollup GraphQL에서 input/notice를 조회하고 notice payload를 디코딩.
//!
//! # Payload Format
//!
//! notice payload는 hex 인코딩된 JSON:
//!
//! ```json
//! {
//!   "noticeType": "dscr_result",
//!   "loanApplicationId": "clx9...",
//!   "dscrValue": 1.42,
//!   "proofHash": "0x9c2d...",
//!   "recommendedRateBps": 850,
//!   "currentRateBps": 900
//! }
//! ```
//!
//! 판별 필드는 `noticeType` 또는 `type`. 모르는 타입은 무시 대상.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// relay 대상 notice 타입
pub const DSCR_RESULT_NOTICE: &str = "dscr_result";

/// rollup input (advance request) 하나와 그 notice들
#[derive(Debug, Clone)]
pub struct RollupInput {
    pub index: u64,
    pub notices: Vec<RollupNotice>,
}

#[derive(Debug, Clone)]
pub struct RollupNotice {
    pub index: u64,
    /// 0x-prefixed hex
    pub payload: String,
}

/// notice 조회 인터페이스
#[async_trait]
pub trait NoticeSource: Send + Sync {
    /// `cursor`보다 큰 index의 input을 오름차순으로 최대 `limit`개
    async fn fetch_inputs_after(&self, cursor: Option<u64>, limit: u32) -> Result<Vec<RollupInput>>;
}

const PENDING_NOTICES_QUERY: &str = r#"
query PendingNotices($first: Int!, $after: Int!) {
  inputs(first: $first, where: { indexGreaterThan: $after }) {
    edges {
      node {
        index
        notices {
          edges {
            node {
              index
              payload
            }
          }
        }
      }
    }
  }
}
"#;

#[derive(Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: Value,
}

#[derive(Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Deserialize)]
struct Connection<T> {
    edges: Vec<Edge<T>>,
}

#[derive(Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Deserialize)]
struct InputsData {
    inputs: Connection<InputNode>,
}

#[derive(Deserialize)]
struct InputNode {
    index: u64,
    notices: Connection<NoticeNode>,
}

#[derive(Deserialize)]
struct NoticeNode {
    index: u64,
    payload: String,
}

/// Cartesi rollups GraphQL 클라이언트
pub struct CartesiGraphqlClient {
    client: reqwest::Client,
    url: String,
}

impl CartesiGraphqlClient {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build GraphQL HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl NoticeSource for CartesiGraphqlClient {
    async fn fetch_inputs_after(&self, cursor: Option<u64>, limit: u32) -> Result<Vec<RollupInput>> {
        // cursor 없음 → index 0부터
        let after = cursor.map(|c| c as i64).unwrap_or(-1);

        let request = GraphqlRequest {
            query: PENDING_NOTICES_QUERY,
            variables: serde_json::json!({ "first": limit, "after": after }),
        };

        let response: GraphqlResponse<InputsData> = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .context("Failed to reach rollup GraphQL endpoint")?
            .error_for_status()
            .context("Rollup GraphQL endpoint returned an error status")?
            .json()
            .await
            .context("Failed to parse rollup GraphQL response")?;

        if let Some(errors) = response.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
            return Err(anyhow!("Rollup GraphQL errors: {}", messages.join("; ")));
        }

        let data = response
            .data
            .ok_or_else(|| anyhow!("Rollup GraphQL response has no data"))?;

        let mut inputs: Vec<RollupInput> = data
            .inputs
            .edges
            .into_iter()
            .map(|edge| {
                let mut notices: Vec<RollupNotice> = edge
                    .node
                    .notices
                    .edges
                    .into_iter()
                    .map(|n| RollupNotice {
                        index: n.node.index,
                        payload: n.node.payload,
                    })
                    .collect();
                notices.sort_by_key(|n| n.index);
                RollupInput {
                    index: edge.node.index,
                    notices,
                }
            })
            .collect();

        inputs.sort_by_key(|i| i.index);
        Ok(inputs)
    }
}

/// payload 디코딩 에러
#[derive(Debug, Error)]
pub enum NoticeDecodeError {
    #[error("payload is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// 디코딩된 notice
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedNotice {
    Dscr(DscrResult),
    /// 이 relay가 담당하지 않는 타입 (판별 필드 없음 포함)
    Ignored { notice_type: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DscrResult {
    pub loan_application_id: String,
    /// DSCR * 10_000 (반올림)
    pub dscr_bps: u64,
    pub proof_hash: Option<[u8; 32]>,
    pub recommended_rate_bps: Option<u64>,
    pub current_rate_bps: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DscrPayload {
    #[serde(alias = "loanId")]
    loan_application_id: String,
    dscr_value: f64,
    #[serde(default)]
    proof_hash: Option<String>,
    #[serde(default)]
    recommended_rate_bps: Option<u64>,
    #[serde(default)]
    current_rate_bps: Option<u64>,
}

/// hex payload → JSON → 판별 필드 확인 → 타입별 파싱
pub fn decode_notice(payload: &str) -> Result<DecodedNotice, NoticeDecodeError> {
    let bytes = hex::decode(payload.trim_start_matches("0x"))?;
    let value: Value = serde_json::from_slice(&bytes)?;

    let notice_type = value
        .get("noticeType")
        .or_else(|| value.get("type"))
        .and_then(Value::as_str)
        .map(str::to_string);

    match notice_type.as_deref() {
        Some(t) if t.eq_ignore_ascii_case(DSCR_RESULT_NOTICE) => {
            let payload: DscrPayload = serde_json::from_value(value)?;
            Ok(DecodedNotice::Dscr(payload.validate()?))
        }
        _ => Ok(DecodedNotice::Ignored { notice_type }),
    }
}

impl DscrPayload {
    fn validate(self) -> Result<DscrResult, NoticeDecodeError> {
        if self.loan_application_id.trim().is_empty() {
            return Err(NoticeDecodeError::InvalidField {
                field: "loanApplicationId",
                reason: "must not be empty".to_string(),
            });
        }

        if !self.dscr_value.is_finite() || self.dscr_value < 0.0 {
            return Err(NoticeDecodeError::InvalidField {
                field: "dscrValue",
                reason: format!("{} is not a non-negative number", self.dscr_value),
            });
        }

        let proof_hash = self
            .proof_hash
            .as_deref()
            .map(parse_bytes32)
            .transpose()?;

        Ok(DscrResult {
            loan_application_id: self.loan_application_id,
            dscr_bps: (self.dscr_value * 10_000.0).round() as u64,
            proof_hash,
            recommended_rate_bps: self.recommended_rate_bps,
            current_rate_bps: self.current_rate_bps,
        })
    }
}

fn parse_bytes32(raw: &str) -> Result<[u8; 32], NoticeDecodeError> {
    let bytes = hex::decode(raw.trim_start_matches("0x")).map_err(|e| NoticeDecodeError::InvalidField {
        field: "proofHash",
        reason: e.to_string(),
    })?;

    bytes.try_into().map_err(|b: Vec<u8>| NoticeDecodeError::InvalidField {
        field: "proofHash",
        reason: format!("expected 32 bytes, got {}", b.len()),
    })
}

/// 테스트/fixture용 JSON → hex payload
pub fn encode_payload(value: &Value) -> String {
    format!("0x{}", hex::encode(value.to_string()))
}
