//! Services Module
//!
//! 인덱서 비즈니스 로직을 담당하는 서비스 레이어
//!
//! # Services
//! - `EthersChainClient`: 상환 이벤트 스캔, distributeYield / recordDscr 제출
//! - `LedgerMatcher`: 온체인 loanId → off-chain 대출 매핑
//! - `BatchProgress`: watermark 계산
//! - `YieldDistributor`: 상환 이자 → 풀 yield 분배 파이프라인
//! - `CartesiGraphqlClient` / `NoticeRelay`: rollup DSCR notice relay 파이프라인
//! - `DistributedLock`: 실행 단위 상호 배제
//! - `IndexerJobs` / `IndexerScheduler`: 락을 잡은 실행 진입점과 내부 스케줄러

pub mod chain;
pub mod jobs;
pub mod ledger;
pub mod lock;
pub mod notice;
pub mod notice_relay;
pub mod scheduler;
pub mod watermark;
pub mod yield_distribution;

pub use chain::{ChainClient, EthersChainClient, RepaymentEvent};
pub use jobs::{IndexerJobs, JobResult};
pub use ledger::LedgerMatcher;
pub use lock::{with_lock, DistributedLock, LockError, LockOutcome, MemoryLock, PostgresLock};
pub use notice::{CartesiGraphqlClient, NoticeSource};
pub use notice_relay::{NoticeRelay, RelaySummary};
pub use scheduler::IndexerScheduler;
pub use watermark::BatchProgress;
pub use yield_distribution::{DistributionSummary, YieldDistributor};
