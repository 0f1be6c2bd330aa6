//! Common Types Module
//!
//! 애플리케이션 전반에서 사용되는 공통 타입 정의

use std::fmt;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// 온체인 loanId (bytes32)
///
/// 컨트랙트는 `keccak256(loanApplicationId)`를 loanId로 사용하므로
/// off-chain id를 같은 방식으로 해싱해서 매칭한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoanKey(pub [u8; 32]);

impl LoanKey {
    /// off-chain loan application id → 온체인 loanId
    pub fn from_application_id(loan_application_id: &str) -> Self {
        let digest = Keccak256::digest(loan_application_id.as_bytes());
        Self(digest.into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for LoanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// 인덱서 스트림 (watermark 단위)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerStream {
    YieldDistribution,
    NoticeRelay,
}

impl IndexerStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexerStream::YieldDistribution => "yield_distribution",
            IndexerStream::NoticeRelay => "notice_relay",
        }
    }

    /// 분산 락 키도 스트림 이름을 그대로 사용
    pub fn lock_key(&self) -> &'static str {
        self.as_str()
    }
}

/// 닫힌 블록 구간 `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    /// start > end 이면 빈 구간 → None
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// `chunk_size` 블록 단위로 분할 (chunk_size 0은 1로 취급)
    pub fn chunks(&self, chunk_size: u64) -> impl Iterator<Item = BlockRange> {
        let size = chunk_size.max(1);
        let end = self.end;
        let mut next = Some(self.start);

        std::iter::from_fn(move || {
            let start = next?;
            let chunk_end = start.saturating_add(size - 1).min(end);
            next = chunk_end.checked_add(1).filter(|n| *n <= end);
            Some(BlockRange { start, end: chunk_end })
        })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
