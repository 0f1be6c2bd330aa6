//! Chain Service
//!
//! Handles blockchain network interactions.
//!
//! # Features
//! - `LoanRepaymentMade` log scan over a bounded block range
//! - `distributeYield` / `recordDscr` transactions, signed locally
//! - Receipt lookup for transactions whose outcome was not observed
//!
//! # Interview Q&A
//!
//! Q: 서명과 전송을 왜 나누는가?
//! A: 전송 결과를 모르는 상황(receipt 대기 중 RPC 에러, 프로세스 종료)에서
//!    중복 전송을 막기 위해
//!
//!    ```text
//!    sign ──► tx hash + raw 저장 ──► send_signed ──► receipt
//!                  │
//!                  └─ 다음 실행: receipt 조회 → 없으면 같은 raw 재전송
//!    ```
//!
//!    같은 raw 트랜잭션은 같은 nonce를 쓰므로 몇 번을 보내도 최대 한 번만 실행된다.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider, RpcError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Filter, Log, TransactionRequest, H256, U256, U64};
use ethers::utils::{id, keccak256};
use thiserror::Error;

use crate::config::ChainSettings;
use crate::types::{BlockRange, LoanKey};

/// 상환 이벤트 시그니처 (loanId만 indexed)
pub const LOAN_REPAYMENT_MADE_SIG: &str = "LoanRepaymentMade(bytes32,uint256,uint256)";

/// 풀 컨트랙트 분배 함수
pub const DISTRIBUTE_YIELD_SIG: &str = "distributeYield(uint256,bytes32,uint256,uint256)";

/// DSCR 오라클 기록 함수
pub const RECORD_DSCR_SIG: &str = "recordDscr(bytes32,uint256,bytes32)";

/// 체인에서 읽은 상환 이벤트 (스캔마다 새로 조회, 저장하지 않음)
#[derive(Debug, Clone)]
pub struct RepaymentEvent {
    pub loan_id: LoanKey,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: Option<String>,
    pub repayment_amount: U256,
    pub interest_amount: U256,
}

impl RepaymentEvent {
    /// 원금 = 상환액 - 이자 (음수 방지)
    pub fn principal_amount(&self) -> U256 {
        self.repayment_amount.saturating_sub(self.interest_amount)
    }
}

/// distributeYield 호출 입력
#[derive(Debug, Clone)]
pub struct YieldSubmission {
    pub pool_contract: String,
    pub interest_amount: U256,
    pub loan_id: LoanKey,
    pub principal_amount: U256,
    pub source_block: u64,
}

/// recordDscr 호출 입력
#[derive(Debug, Clone)]
pub struct DscrRelay {
    pub loan_id: LoanKey,
    /// DSCR * 10_000
    pub dscr_bps: u64,
    pub proof_hash: [u8; 32],
}

/// 서명 완료, 아직 전송 전인 트랜잭션
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTx {
    pub hash: String,
    pub raw: Bytes,
}

impl SignedTx {
    /// DB 저장용 0x hex
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    /// 저장된 row에서 복원
    pub fn from_stored(hash: &str, raw_hex: &str) -> Result<Self> {
        let raw = hex::decode(raw_hex.trim_start_matches("0x"))
            .with_context(|| format!("Stored transaction {} is not valid hex", hash))?;
        Ok(Self {
            hash: hash.to_string(),
            raw: Bytes::from(raw),
        })
    }
}

/// receipt 조회 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed,
    Reverted,
    /// receipt 없음 (미전송, mempool 대기, 또는 drop)
    Unknown,
}

/// 전송 실패 분류
///
/// 재claim(새 서명) 가능 여부가 갈린다:
/// - `Rejected`, `Reverted`: 실행되지 않았음이 확실 → FAILED
/// - `Unconfirmed`: 실행됐을 수도 있음 → SUBMITTED 유지
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("transaction {tx_hash} rejected by node: {reason}")]
    Rejected { tx_hash: String, reason: String },

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("transaction {tx_hash} outcome unknown: {reason}")]
    Unconfirmed { tx_hash: String, reason: String },
}

impl SubmitError {
    /// 이 트랜잭션이 실행되지 않았음이 확실한지
    pub fn is_definitive(&self) -> bool {
        !matches!(self, SubmitError::Unconfirmed { .. })
    }
}

/// 체인 클라이언트 인터페이스
///
/// 파이프라인은 이 trait에만 의존 → 테스트에서는 Mock으로 교체
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// 서명 키가 있어 트랜잭션 전송이 가능한지
    fn can_submit(&self) -> bool;

    async fn block_number(&self) -> Result<u64>;

    /// 구간 내 상환 이벤트 (block, log_index 오름차순)
    async fn repayment_events(&self, range: BlockRange) -> Result<Vec<RepaymentEvent>>;

    async fn sign_distribute_yield(&self, submission: &YieldSubmission) -> Result<SignedTx>;

    async fn sign_record_dscr(&self, relay: &DscrRelay) -> Result<SignedTx>;

    /// 전송 후 receipt 대기. 같은 tx를 다시 보내도 안전
    async fn send_signed(&self, tx: &SignedTx) -> Result<(), SubmitError>;

    async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus>;
}

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// ethers-rs 기반 구현
pub struct EthersChainClient {
    provider: Provider<Http>,
    signer: Option<SignerClient>,
    loan_pool: Address,
    dscr_oracle: Option<Address>,
    repayment_topic: H256,
}

impl EthersChainClient {
    /// 새 클라이언트 생성
    ///
    /// HTTP provider는 lazy 연결이므로 여기서는 네트워크 호출 없음
    pub fn new(settings: &ChainSettings) -> Result<Self> {
        let provider = Provider::<Http>::try_from(settings.rpc_url.as_str())
            .map_err(|e| anyhow!("Failed to create HTTP provider: {}", e))?;

        let loan_pool = settings
            .loan_pool_address
            .parse::<Address>()
            .map_err(|e| anyhow!("Invalid loan pool address: {}", e))?;

        let dscr_oracle = settings
            .dscr_oracle_address
            .as_deref()
            .map(|addr| addr.parse::<Address>())
            .transpose()
            .map_err(|e| anyhow!("Invalid DSCR oracle address: {}", e))?;

        let signer = match settings.relayer_private_key.as_deref() {
            Some(key) => {
                let wallet = key
                    .parse::<LocalWallet>()
                    .map_err(|e| anyhow!("Invalid relayer private key: {}", e))?
                    .with_chain_id(settings.chain_id);
                tracing::info!(relayer = ?wallet.address(), "Relayer signer configured");
                Some(SignerMiddleware::new(provider.clone(), wallet))
            }
            None => {
                tracing::warn!("RELAYER_PRIVATE_KEY not set, chain client is read-only");
                None
            }
        };

        Ok(Self {
            provider,
            signer,
            loan_pool,
            dscr_oracle,
            repayment_topic: H256::from(keccak256(LOAN_REPAYMENT_MADE_SIG.as_bytes())),
        })
    }

    /// nonce/gas 채우고 로컬 서명. 네트워크로는 아무것도 보내지 않음
    async fn sign(&self, to: Address, data: Vec<u8>) -> Result<SignedTx> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| anyhow!("Relayer signer not configured"))?;

        let mut tx: TypedTransaction = TransactionRequest::new()
            .from(signer.address())
            .to(to)
            .data(data)
            .into();

        signer
            .fill_transaction(&mut tx, None)
            .await
            .map_err(|e| anyhow!("Failed to prepare transaction: {}", e))?;

        let signature = signer
            .signer()
            .sign_transaction(&tx)
            .await
            .map_err(|e| anyhow!("Failed to sign transaction: {}", e))?;

        let raw = tx.rlp_signed(&signature);
        let hash = format!("{:?}", H256::from(keccak256(&raw)));
        Ok(SignedTx { hash, raw })
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    fn can_submit(&self) -> bool {
        self.signer.is_some()
    }

    async fn block_number(&self) -> Result<u64> {
        let head = self
            .provider
            .get_block_number()
            .await
            .context("Failed to fetch block number")?;
        Ok(head.as_u64())
    }

    async fn repayment_events(&self, range: BlockRange) -> Result<Vec<RepaymentEvent>> {
        let filter = Filter::new()
            .address(self.loan_pool)
            .from_block(range.start)
            .to_block(range.end)
            .topic0(self.repayment_topic);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .with_context(|| format!("get_logs failed for blocks {}", range))?;

        let mut events = logs
            .iter()
            .map(decode_repayment_log)
            .collect::<Result<Vec<_>>>()?;

        // provider 정렬에 의존하지 않음
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }

    async fn sign_distribute_yield(&self, submission: &YieldSubmission) -> Result<SignedTx> {
        let pool = submission
            .pool_contract
            .parse::<Address>()
            .map_err(|e| anyhow!("Invalid pool contract address {}: {}", submission.pool_contract, e))?;

        self.sign(pool, encode_distribute_yield(submission)).await
    }

    async fn sign_record_dscr(&self, relay: &DscrRelay) -> Result<SignedTx> {
        let oracle = self
            .dscr_oracle
            .ok_or_else(|| anyhow!("DSCR_ORACLE_ADDRESS not configured"))?;

        self.sign(oracle, encode_record_dscr(relay)).await
    }

    /// JSON-RPC 에러 응답 = 노드가 거부 (mempool에 없음)
    /// 전송 계층 에러 = 노드가 받았는지 알 수 없음
    async fn send_signed(&self, tx: &SignedTx) -> Result<(), SubmitError> {
        let tx_hash = tx.hash.clone();

        let pending = match self.provider.send_raw_transaction(tx.raw.clone()).await {
            Ok(pending) => pending,
            Err(e) if e.as_error_response().is_some() => {
                return Err(SubmitError::Rejected { tx_hash, reason: e.to_string() });
            }
            Err(e) => {
                return Err(SubmitError::Unconfirmed { tx_hash, reason: e.to_string() });
            }
        };

        tracing::debug!(%tx_hash, "Transaction sent");

        match pending.await {
            Ok(Some(receipt)) if receipt.status == Some(U64::from(1)) => Ok(()),
            Ok(Some(_)) => Err(SubmitError::Reverted { tx_hash }),
            Ok(None) => Err(SubmitError::Unconfirmed {
                tx_hash,
                reason: "dropped from mempool".to_string(),
            }),
            Err(e) => Err(SubmitError::Unconfirmed { tx_hash, reason: e.to_string() }),
        }
    }

    async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus> {
        let hash = tx_hash
            .parse::<H256>()
            .map_err(|e| anyhow!("Invalid transaction hash {}: {}", tx_hash, e))?;

        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .with_context(|| format!("Failed to fetch receipt for {}", tx_hash))?;

        Ok(match receipt {
            Some(receipt) if receipt.status == Some(U64::from(1)) => TxStatus::Confirmed,
            Some(_) => TxStatus::Reverted,
            None => TxStatus::Unknown,
        })
    }
}

/// LoanRepaymentMade 로그 디코딩
///
/// topics: [sig, loanId]
/// data: repaymentAmount (uint256), interestAmount (uint256)
pub fn decode_repayment_log(log: &Log) -> Result<RepaymentEvent> {
    let block_number = log
        .block_number
        .context("LoanRepaymentMade log missing block number")?
        .as_u64();

    let loan_topic = log
        .topics
        .get(1)
        .context("LoanRepaymentMade log missing loanId topic")?;

    let tokens = abi::decode(&[ParamType::Uint(256), ParamType::Uint(256)], &log.data)
        .with_context(|| format!("Failed to decode LoanRepaymentMade data at block {}", block_number))?;

    let mut values = tokens.into_iter().map(Token::into_uint);
    let (Some(Some(repayment_amount)), Some(Some(interest_amount))) = (values.next(), values.next()) else {
        return Err(anyhow!("LoanRepaymentMade data at block {} is not (uint256, uint256)", block_number));
    };

    Ok(RepaymentEvent {
        loan_id: LoanKey(loan_topic.0),
        block_number,
        log_index: log.log_index.map(|i| i.as_u64()).unwrap_or_default(),
        tx_hash: log.transaction_hash.map(|h| format!("{:?}", h)),
        repayment_amount,
        interest_amount,
    })
}

/// distributeYield(uint256 interest, bytes32 loanId, uint256 principal, uint256 sourceBlock)
pub fn encode_distribute_yield(submission: &YieldSubmission) -> Vec<u8> {
    let mut data = id(DISTRIBUTE_YIELD_SIG).to_vec();
    data.extend(abi::encode(&[
        Token::Uint(submission.interest_amount),
        Token::FixedBytes(submission.loan_id.as_bytes().to_vec()),
        Token::Uint(submission.principal_amount),
        Token::Uint(U256::from(submission.source_block)),
    ]));
    data
}

/// recordDscr(bytes32 loanId, uint256 dscrBps, bytes32 proofHash)
pub fn encode_record_dscr(relay: &DscrRelay) -> Vec<u8> {
    let mut data = id(RECORD_DSCR_SIG).to_vec();
    data.extend(abi::encode(&[
        Token::FixedBytes(relay.loan_id.as_bytes().to_vec()),
        Token::Uint(U256::from(relay.dscr_bps)),
        Token::FixedBytes(relay.proof_hash.to_vec()),
    ]));
    data
}

// 테스트용 Mock 구현:

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum SignedCall {
        Yield(YieldSubmission),
        Dscr(DscrRelay),
    }

    /// 미리 정해둔 이벤트를 반환하고, 지정된 블록/대출에서 revert
    ///
    /// 서명한 트랜잭션은 hash로 기억해 두고 `send_signed`에서 실행한다.
    /// 실행된 트랜잭션은 `mined`에 남아 `transaction_status`로 조회된다.
    pub struct MockChain {
        pub head: u64,
        pub can_submit: bool,
        pub events: Vec<RepaymentEvent>,
        /// 이 블록의 distributeYield는 revert
        pub revert_blocks: HashSet<u64>,
        /// 이 블록의 distributeYield는 실행되지만 receipt 대기가 실패
        pub unconfirmed_blocks: HashSet<u64>,
        /// 이 블록 이상을 포함하는 스캔은 provider 에러
        pub scan_error_from: Option<u64>,
        /// 이 loanId의 recordDscr는 revert
        pub revert_dscr_loans: HashSet<LoanKey>,
        /// true면 send_signed가 끝나지 않음 (전송 전 멈춤)
        pub stall_sends: AtomicBool,
        /// send_signed 응답 지연 (느린 receipt)
        pub send_delay: Option<std::time::Duration>,
        /// 실행된 distributeYield (revert 포함)
        pub submissions: Mutex<Vec<YieldSubmission>>,
        /// 실행된 recordDscr (revert 포함)
        pub dscr_relays: Mutex<Vec<DscrRelay>>,
        pub scanned: Mutex<Vec<BlockRange>>,
        pub signed: Mutex<HashMap<String, SignedCall>>,
        pub mined: Mutex<HashMap<String, TxStatus>>,
        nonce: AtomicU64,
    }

    impl MockChain {
        pub fn new(head: u64) -> Self {
            Self {
                head,
                can_submit: true,
                events: Vec::new(),
                revert_blocks: HashSet::new(),
                unconfirmed_blocks: HashSet::new(),
                scan_error_from: None,
                revert_dscr_loans: HashSet::new(),
                stall_sends: AtomicBool::new(false),
                send_delay: None,
                submissions: Mutex::new(Vec::new()),
                dscr_relays: Mutex::new(Vec::new()),
                scanned: Mutex::new(Vec::new()),
                signed: Mutex::new(HashMap::new()),
                mined: Mutex::new(HashMap::new()),
                nonce: AtomicU64::new(0),
            }
        }

        pub fn with_repayment(mut self, loan_application_id: &str, block: u64, interest: u64) -> Self {
            let log_index = self.events.iter().filter(|e| e.block_number == block).count() as u64;
            self.events.push(RepaymentEvent {
                loan_id: LoanKey::from_application_id(loan_application_id),
                block_number: block,
                log_index,
                tx_hash: None,
                repayment_amount: U256::from(interest) + U256::from(1_000_000u64),
                interest_amount: U256::from(interest),
            });
            self
        }

        pub fn reverting_at(mut self, block: u64) -> Self {
            self.revert_blocks.insert(block);
            self
        }

        pub fn submission_count(&self) -> usize {
            self.submissions.lock().unwrap().len()
        }

        fn sign_call(&self, call: SignedCall, data: Vec<u8>) -> SignedTx {
            let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
            let hash = format!("0x{:064x}", nonce + 1);
            self.signed.lock().unwrap().insert(hash.clone(), call);
            SignedTx { hash, raw: Bytes::from(data) }
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        fn can_submit(&self) -> bool {
            self.can_submit
        }

        async fn block_number(&self) -> Result<u64> {
            Ok(self.head)
        }

        async fn repayment_events(&self, range: BlockRange) -> Result<Vec<RepaymentEvent>> {
            self.scanned.lock().unwrap().push(range);
            if let Some(from) = self.scan_error_from {
                if range.end >= from {
                    return Err(anyhow!("provider unavailable"));
                }
            }
            let mut events: Vec<_> = self
                .events
                .iter()
                .filter(|e| e.block_number >= range.start && e.block_number <= range.end)
                .cloned()
                .collect();
            events.sort_by_key(|e| (e.block_number, e.log_index));
            Ok(events)
        }

        async fn sign_distribute_yield(&self, submission: &YieldSubmission) -> Result<SignedTx> {
            let data = encode_distribute_yield(submission);
            Ok(self.sign_call(SignedCall::Yield(submission.clone()), data))
        }

        async fn sign_record_dscr(&self, relay: &DscrRelay) -> Result<SignedTx> {
            let data = encode_record_dscr(relay);
            Ok(self.sign_call(SignedCall::Dscr(relay.clone()), data))
        }

        async fn send_signed(&self, tx: &SignedTx) -> Result<(), SubmitError> {
            if self.stall_sends.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = self.send_delay {
                tokio::time::sleep(delay).await;
            }

            let tx_hash = tx.hash.clone();
            if let Some(status) = self.mined.lock().unwrap().get(&tx_hash).copied() {
                // 이미 실행된 tx 재전송: nonce가 소비되어 다시 실행되지 않음
                return match status {
                    TxStatus::Reverted => Err(SubmitError::Reverted { tx_hash }),
                    _ => Ok(()),
                };
            }

            let call = self.signed.lock().unwrap().get(&tx_hash).cloned();
            let (status, unconfirmed) = match call {
                Some(SignedCall::Yield(submission)) => {
                    let block = submission.source_block;
                    self.submissions.lock().unwrap().push(submission);
                    let status = if self.revert_blocks.contains(&block) {
                        TxStatus::Reverted
                    } else {
                        TxStatus::Confirmed
                    };
                    (status, self.unconfirmed_blocks.contains(&block))
                }
                Some(SignedCall::Dscr(relay)) => {
                    let reverted = self.revert_dscr_loans.contains(&relay.loan_id);
                    self.dscr_relays.lock().unwrap().push(relay);
                    let status = if reverted { TxStatus::Reverted } else { TxStatus::Confirmed };
                    (status, false)
                }
                None => {
                    return Err(SubmitError::Rejected {
                        tx_hash,
                        reason: "unknown transaction".to_string(),
                    })
                }
            };

            self.mined.lock().unwrap().insert(tx_hash.clone(), status);

            if unconfirmed {
                return Err(SubmitError::Unconfirmed {
                    tx_hash,
                    reason: "receipt polling failed".to_string(),
                });
            }
            match status {
                TxStatus::Reverted => Err(SubmitError::Reverted { tx_hash }),
                _ => Ok(()),
            }
        }

        async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus> {
            Ok(self
                .mined
                .lock()
                .unwrap()
                .get(tx_hash)
                .copied()
                .unwrap_or(TxStatus::Unknown))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;

    fn settings(private_key: Option<&str>) -> ChainSettings {
        ChainSettings {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 31337,
            relayer_private_key: private_key.map(str::to_string),
            loan_pool_address: "0x1234567890123456789012345678901234567890".to_string(),
            dscr_oracle_address: None,
        }
    }

    #[test]
    fn test_client_without_key_is_read_only() {
        let client = EthersChainClient::new(&settings(None)).unwrap();
        assert!(!client.can_submit());
    }

    #[test]
    fn test_client_with_key_can_submit() {
        // Anvil 기본 계정 #0
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let client = EthersChainClient::new(&settings(Some(key))).unwrap();
        assert!(client.can_submit());
    }

    #[test]
    fn test_invalid_pool_address_rejected() {
        let mut s = settings(None);
        s.loan_pool_address = "not-an-address".to_string();
        assert!(EthersChainClient::new(&s).is_err());
    }

    #[test]
    fn test_decode_repayment_log() {
        let loan = LoanKey::from_application_id("loan-1");
        let log = Log {
            topics: vec![
                H256::from(keccak256(LOAN_REPAYMENT_MADE_SIG.as_bytes())),
                H256::from(loan.0),
            ],
            data: Bytes::from(abi::encode(&[
                Token::Uint(U256::from(1_050u64)),
                Token::Uint(U256::from(50u64)),
            ])),
            block_number: Some(U64::from(120u64)),
            log_index: Some(U256::from(3u64)),
            ..Default::default()
        };

        let event = decode_repayment_log(&log).unwrap();
        assert_eq!(event.loan_id, loan);
        assert_eq!(event.block_number, 120);
        assert_eq!(event.log_index, 3);
        assert_eq!(event.interest_amount, U256::from(50u64));
        assert_eq!(event.principal_amount(), U256::from(1_000u64));
    }

    #[test]
    fn test_decode_rejects_pending_log() {
        let log = Log {
            topics: vec![H256::zero(), H256::zero()],
            block_number: None,
            ..Default::default()
        };
        assert!(decode_repayment_log(&log).is_err());
    }

    #[test]
    fn test_principal_never_underflows() {
        let event = RepaymentEvent {
            loan_id: LoanKey::from_application_id("x"),
            block_number: 1,
            log_index: 0,
            tx_hash: None,
            repayment_amount: U256::from(10u64),
            interest_amount: U256::from(25u64),
        };
        assert_eq!(event.principal_amount(), U256::zero());
    }

    #[test]
    fn test_signed_tx_survives_storage() {
        let tx = SignedTx {
            hash: "0xabc".to_string(),
            raw: Bytes::from(vec![0x02, 0xf8, 0x71]),
        };

        assert_eq!(tx.raw_hex(), "0x02f871");
        assert_eq!(SignedTx::from_stored(&tx.hash, &tx.raw_hex()).unwrap(), tx);
        assert!(SignedTx::from_stored("0xabc", "0xzz").is_err());
    }

    #[test]
    fn test_only_unconfirmed_is_ambiguous() {
        let hash = || "0x01".to_string();
        assert!(SubmitError::Reverted { tx_hash: hash() }.is_definitive());
        assert!(SubmitError::Rejected { tx_hash: hash(), reason: "nonce too low".into() }.is_definitive());
        assert!(!SubmitError::Unconfirmed { tx_hash: hash(), reason: "timeout".into() }.is_definitive());
    }

    #[tokio::test]
    async fn test_signing_requires_key() {
        let client = EthersChainClient::new(&settings(None)).unwrap();
        let submission = YieldSubmission {
            pool_contract: "0x00000000000000000000000000000000000000aa".to_string(),
            interest_amount: U256::from(50u64),
            loan_id: LoanKey::from_application_id("loan-1"),
            principal_amount: U256::from(1_000u64),
            source_block: 120,
        };

        let err = client.sign_distribute_yield(&submission).await.unwrap_err();
        assert!(err.to_string().contains("signer not configured"));
    }

    #[test]
    fn test_encode_distribute_yield_layout() {
        let submission = YieldSubmission {
            pool_contract: "0x00000000000000000000000000000000000000aa".to_string(),
            interest_amount: U256::from(50u64),
            loan_id: LoanKey::from_application_id("loan-1"),
            principal_amount: U256::from(1_000u64),
            source_block: 120,
        };

        let data = encode_distribute_yield(&submission);
        assert_eq!(&data[..4], &id(DISTRIBUTE_YIELD_SIG));
        assert_eq!(data.len(), 4 + 32 * 4);

        let decoded = abi::decode(
            &[
                ParamType::Uint(256),
                ParamType::FixedBytes(32),
                ParamType::Uint(256),
                ParamType::Uint(256),
            ],
            &data[4..],
        )
        .unwrap();
        assert_eq!(decoded[3], Token::Uint(U256::from(120u64)));
    }
}
