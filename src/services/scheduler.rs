//! In-process Scheduler
//!
//! 외부 cron 없이 운영할 때 사용 (`SCHEDULER_INTERVAL_SECS`).
//! HTTP 엔드포인트와 같은 락을 잡으므로 외부 cron과 함께 켜도 중복 실행되지 않는다.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::services::jobs::IndexerJobs;
use crate::services::lock::LockOutcome;

pub struct IndexerScheduler {
    jobs: Arc<IndexerJobs>,
    period: Duration,
}

impl IndexerScheduler {
    pub fn new(jobs: Arc<IndexerJobs>, period: Duration) -> Self {
        Self { jobs, period }
    }

    /// 백그라운드 루프 시작
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("⏰ Indexer scheduler running every {}s", self.period.as_secs());

            let mut ticker = interval(self.period);
            // 실행이 주기보다 길어지면 밀린 tick은 버림
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                self.run_cycle().await;
            }
        })
    }

    /// 한 주기: 분배 → relay 순서. 한쪽 실패가 다른 쪽을 막지 않음
    async fn run_cycle(&self) {
        match self.jobs.distribute_yield().await {
            Ok(LockOutcome::Completed(summary)) => debug!(
                distributed = summary.results.distributed,
                failed = summary.results.failed,
                watermark = ?summary.watermark,
                "Scheduled yield distribution done"
            ),
            Ok(LockOutcome::Contended) => debug!("Yield distribution already running elsewhere"),
            Err(e) => error!("❌ Scheduled yield distribution failed: {:#}", e),
        }

        match self.jobs.relay_notices().await {
            Ok(LockOutcome::Completed(summary)) => debug!(
                relayed = summary.relayed_count,
                failed = summary.failed_count,
                cursor = ?summary.cursor,
                "Scheduled notice relay done"
            ),
            Ok(LockOutcome::Contended) => debug!("Notice relay already running elsewhere"),
            Err(e) => error!("❌ Scheduled notice relay failed: {:#}", e),
        }
    }
}
