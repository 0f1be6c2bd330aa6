//! Distributed Lock
//!
//! # Interview Q&A
//!
//! Q: cron이 겹쳐서 실행되면 무엇이 문제인가?
//! A: 두 실행이 같은 블록 구간을 동시에 처리
//!    - DB claim 덕분에 중복 분배는 막히지만, RPC/가스 낭비
//!    - watermark 쓰기 경합 (GREATEST로 안전하지만 불필요한 작업)
//!
//!    → 실행 전체를 lease로 감싸서 한 번에 하나만 실행
//!
//! Q: lease 만료(TTL)는 왜 필요한가?
//! A: 프로세스가 죽으면 release가 호출되지 않음
//!    - TTL(기본 5분)이 지나면 다음 실행이 lease를 가져감
//!    - 늦게 끝난 이전 실행이 release해도 token이 달라 새 lease는 유지
//!
//! Q: 실행이 TTL보다 오래 걸리면?
//! A: 실행 중에는 TTL/3 간격으로 lease를 연장 (heartbeat)
//!    - 연장 실패(token 불일치)는 경고만 남기고 작업은 계속
//!
//! Q: 왜 Redis가 아니라 Postgres인가?
//! A: 이미 Postgres가 유일한 상태 저장소
//!    - 의존성 추가 없이 `INSERT ... ON CONFLICT ... WHERE expires_at < NOW()`로 SETNX+TTL 구현
//!    - 개발/테스트용 in-memory 백엔드도 제공

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// 획득한 lease
#[derive(Debug, Clone)]
pub struct LockGuard {
    pub key: String,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// 분산 락 인터페이스
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 다른 인스턴스가 보유 중이면 Ok(None)
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>>;

    /// 만료 시각을 지금 + ttl로 갱신. token이 바뀌었으면 Ok(false)
    async fn extend(&self, guard: &LockGuard, ttl: Duration) -> Result<bool>;

    /// 내 token이 아직 보유 중일 때만 해제
    async fn release(&self, guard: &LockGuard) -> Result<()>;
}

fn heartbeat_period(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(10))
}

/// `with_lock` 결과
#[derive(Debug)]
pub enum LockOutcome<T> {
    Completed(T),
    /// 다른 인스턴스 실행 중 (에러 아님)
    Contended,
}

/// 락 획득 실패와 작업 실패를 구분
#[derive(Debug, Error)]
pub enum LockError<E> {
    #[error("Lock backend unavailable: {0:#}")]
    Backend(anyhow::Error),

    #[error("{0}")]
    Task(E),
}

/// lease를 잡고 `task` 실행
///
/// 실행 중에는 lease를 주기적으로 연장한다. 작업이 끝나면 (성공/실패 무관)
/// release. release 실패는 경고만 남기고 TTL 만료에 맡긴다.
pub async fn with_lock<T, E, F, Fut>(
    lock: &dyn DistributedLock,
    key: &str,
    ttl: Duration,
    task: F,
) -> Result<LockOutcome<T>, LockError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let guard = match lock.acquire(key, ttl).await.map_err(LockError::Backend)? {
        Some(guard) => guard,
        None => {
            tracing::info!(lock_key = key, "Another instance is running, skipping");
            return Ok(LockOutcome::Contended);
        }
    };

    tracing::debug!(lock_key = key, token = %guard.token, expires_at = %guard.expires_at, "Lock acquired");

    let task = task();
    tokio::pin!(task);

    let mut heartbeat = tokio::time::interval(heartbeat_period(ttl));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    let result = loop {
        tokio::select! {
            result = &mut task => break result,
            _ = heartbeat.tick() => match lock.extend(&guard, ttl).await {
                Ok(true) => tracing::trace!(lock_key = key, "Lock extended"),
                Ok(false) => tracing::warn!(lock_key = key, token = %guard.token, "Lock lease lost while task is still running"),
                Err(e) => tracing::warn!(lock_key = key, error = %format!("{:#}", e), "Failed to extend lock"),
            },
        }
    };

    if let Err(e) = lock.release(&guard).await {
        tracing::warn!(lock_key = key, error = %format!("{:#}", e), "Failed to release lock, waiting for TTL expiry");
    }

    result.map(LockOutcome::Completed).map_err(LockError::Task)
}

/// Postgres lease row 기반 구현
pub struct PostgresLock {
    pool: PgPool,
}

impl PostgresLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DistributedLock for PostgresLock {
    /// 만료된 lease만 덮어씀 → 유효한 lease가 있으면 RETURNING 없음
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4();

        let row: Option<(Uuid, DateTime<Utc>)> = sqlx::query_as(
            r#"
            INSERT INTO cron_locks (lock_key, token, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (lock_key)
            DO UPDATE SET
                token = EXCLUDED.token,
                expires_at = EXCLUDED.expires_at
            WHERE cron_locks.expires_at < NOW()
            RETURNING token, expires_at
            "#
        )
        .bind(key)
        .bind(token)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(token, expires_at)| LockGuard {
            key: key.to_string(),
            token,
            expires_at,
        }))
    }

    async fn extend(&self, guard: &LockGuard, ttl: Duration) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cron_locks
            SET expires_at = NOW() + make_interval(secs => $3)
            WHERE lock_key = $1 AND token = $2
            "#
        )
        .bind(&guard.key)
        .bind(guard.token)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, guard: &LockGuard) -> Result<()> {
        sqlx::query("DELETE FROM cron_locks WHERE lock_key = $1 AND token = $2")
            .bind(&guard.key)
            .bind(guard.token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// 단일 프로세스용 in-memory 구현 (개발/테스트)
#[derive(Default)]
pub struct MemoryLock {
    leases: Mutex<HashMap<String, (Uuid, Instant)>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();

        if let Some((_, expires)) = leases.get(key) {
            if *expires > now {
                return Ok(None);
            }
        }

        let token = Uuid::new_v4();
        leases.insert(key.to_string(), (token, now + ttl));

        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(Some(LockGuard {
            key: key.to_string(),
            token,
            expires_at: Utc::now() + ttl,
        }))
    }

    async fn extend(&self, guard: &LockGuard, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.lock().await;
        match leases.get_mut(&guard.key) {
            Some((token, expires)) if *token == guard.token => {
                *expires = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, guard: &LockGuard) -> Result<()> {
        let mut leases = self.leases.lock().await;
        if matches!(leases.get(&guard.key), Some((token, _)) if *token == guard.token) {
            leases.remove(&guard.key);
        }
        Ok(())
    }
}
