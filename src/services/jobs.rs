//! Locked Jobs
//!
//! cron 엔드포인트와 내부 스케줄러가 공유하는 진입점.
//! 두 파이프라인 모두 스트림 이름을 락 키로 사용해 한 번에 하나만 실행된다.

use std::sync::Arc;
use std::time::Duration;

use crate::services::lock::{with_lock, DistributedLock, LockError, LockOutcome};
use crate::services::notice_relay::{NoticeRelay, RelaySummary};
use crate::services::yield_distribution::{DistributionSummary, YieldDistributor};
use crate::types::IndexerStream;

pub type JobResult<T> = Result<LockOutcome<T>, LockError<anyhow::Error>>;

pub struct IndexerJobs {
    distributor: YieldDistributor,
    relay: NoticeRelay,
    lock: Arc<dyn DistributedLock>,
    lock_ttl: Duration,
}

impl IndexerJobs {
    pub fn new(
        distributor: YieldDistributor,
        relay: NoticeRelay,
        lock: Arc<dyn DistributedLock>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            distributor,
            relay,
            lock,
            lock_ttl,
        }
    }

    pub async fn distribute_yield(&self) -> JobResult<DistributionSummary> {
        with_lock(
            self.lock.as_ref(),
            IndexerStream::YieldDistribution.lock_key(),
            self.lock_ttl,
            || self.distributor.run(),
        )
        .await
    }

    pub async fn relay_notices(&self) -> JobResult<RelaySummary> {
        with_lock(
            self.lock.as_ref(),
            IndexerStream::NoticeRelay.lock_key(),
            self.lock_ttl,
            || self.relay.run(),
        )
        .await
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::config::IndexerSettings;
    use crate::db::mock::MockRepository;
    use crate::services::chain::mock::MockChain;
    use crate::services::lock::MemoryLock;
    use crate::services::notice::mock::MockNoticeSource;

    pub const TTL: Duration = Duration::from_secs(300);

    pub fn indexer_settings() -> IndexerSettings {
        IndexerSettings {
            start_block: 100,
            chunk_size: 1_000,
            max_chunks_per_run: 10,
            confirmations: 0,
        }
    }

    /// mock 협력자로 구성한 jobs
    pub fn jobs(
        repo: Arc<MockRepository>,
        chain: Arc<MockChain>,
        source: MockNoticeSource,
        lock: Arc<MemoryLock>,
    ) -> IndexerJobs {
        IndexerJobs::new(
            YieldDistributor::new(repo.clone(), chain.clone(), indexer_settings()),
            NoticeRelay::new(repo, chain, Arc::new(source), 50),
            lock,
            TTL,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::db::mock::MockRepository;
    use crate::services::chain::mock::MockChain;
    use crate::services::lock::MemoryLock;
    use crate::services::notice::mock::MockNoticeSource;

    #[tokio::test]
    async fn test_contended_job_does_not_run() {
        let repo = Arc::new(MockRepository::new().with_loan("loan-a", "pool-1"));
        let chain = Arc::new(MockChain::new(200).with_repayment("loan-a", 120, 500));
        let lock = Arc::new(MemoryLock::new());

        // 다른 인스턴스가 이미 보유 중
        let held = lock.acquire("yield_distribution", TTL).await.unwrap().unwrap();

        let jobs = jobs(repo.clone(), chain.clone(), MockNoticeSource::new(), lock.clone());
        let outcome = jobs.distribute_yield().await.unwrap();

        assert!(matches!(outcome, LockOutcome::Contended));
        assert!(chain.scanned.lock().unwrap().is_empty());

        // 다른 스트림은 영향 없음
        assert!(matches!(jobs.relay_notices().await.unwrap(), LockOutcome::Completed(_)));

        lock.release(&held).await.unwrap();
        match jobs.distribute_yield().await.unwrap() {
            LockOutcome::Completed(summary) => assert_eq!(summary.results.distributed, 1),
            LockOutcome::Contended => panic!("lock should be free"),
        }
    }

    #[tokio::test]
    async fn test_pipeline_error_surfaces_as_task_error() {
        let repo = Arc::new(MockRepository::new());
        let mut chain = MockChain::new(200);
        chain.can_submit = false;

        let jobs = jobs(repo, Arc::new(chain), MockNoticeSource::new(), Arc::new(MemoryLock::new()));

        assert!(matches!(jobs.distribute_yield().await, Err(LockError::Task(_))));
        assert!(matches!(jobs.relay_notices().await, Err(LockError::Task(_))));
    }
}
