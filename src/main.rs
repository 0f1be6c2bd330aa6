//! Lending Indexer Server
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              External cron  /  IndexerScheduler              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum Web Server                         │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │          Middleware: IP rate limit → Bearer auth         ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                      Routes Layer                        ││
//! │  │  /health  /api/cron/*  /api/indexer/status              ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Services Layer                        ││
//! │  │  YieldDistributor    NoticeRelay    DistributedLock      ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Data Layer                            ││
//! │  │  PostgreSQL (distributions, watermarks, leases)          ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//!                 │                               │
//!                 ▼                               ▼
//! ┌───────────────────────────────┐ ┌───────────────────────────┐
//! │  Ethereum (LoanPool, Oracle)  │ │  Cartesi rollup GraphQL   │
//! └───────────────────────────────┘ └───────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// 라이브러리에서 가져오기
use lending_indexer::{
    config::LockBackend,
    middleware::{ip_rate_limiter, spawn_rate_limiter_gc},
    routes,
    services::{
        CartesiGraphqlClient, ChainClient, DistributedLock, EthersChainClient, IndexerJobs, IndexerScheduler,
        MemoryLock, NoticeRelay, PostgresLock, YieldDistributor,
    },
    AppState, Config, Database,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 로깅 초기화
    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "lending_indexer=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Lending Indexer");

    // 설정 로드
    let config = Config::from_env()?;
    tracing::info!("📋 Configuration loaded ({:?})", config.environment);

    // 데이터베이스 연결
    let db = Arc::new(Database::connect(&config.database_url).await?);
    tracing::info!("🗄️  Database connected");

    // 마이그레이션 실행
    db.run_migrations().await?;
    tracing::info!("📦 Migrations completed");

    // 체인 클라이언트
    let chain = Arc::new(EthersChainClient::new(&config.chain)?);
    if chain.can_submit() {
        tracing::info!("⛓️  Chain client ready (chain id {})", config.chain.chain_id);
    } else {
        tracing::warn!("⛓️  RELAYER_PRIVATE_KEY not set, cron jobs will fail until configured");
    }

    let notices = Arc::new(CartesiGraphqlClient::new(&config.relay.graphql_url)?);
    tracing::info!("📨 Notice feed: {}", config.relay.graphql_url);

    let lock: Arc<dyn DistributedLock> = match config.cron.lock_backend {
        LockBackend::Postgres => Arc::new(PostgresLock::new(db.pool().clone())),
        LockBackend::Memory => {
            tracing::warn!("🔒 Using in-memory lock, do not run more than one instance");
            Arc::new(MemoryLock::new())
        }
    };

    if config.cron.secret.is_none() {
        tracing::warn!("🔑 CRON_SECRET not set, cron endpoints will reject all requests");
    }

    // 미전송 PENDING claim은 lease TTL이 지나야 다시 가져감
    let stale_claim_after = config.cron.lock_ttl;
    let jobs = Arc::new(IndexerJobs::new(
        YieldDistributor::new(db.clone(), chain.clone(), config.indexer.clone())
            .with_stale_claim_after(stale_claim_after),
        NoticeRelay::new(db.clone(), chain.clone(), notices, config.relay.page_size)
            .with_stale_claim_after(stale_claim_after),
        lock,
        config.cron.lock_ttl,
    ));

    // 내부 스케줄러 (선택)
    if let Some(period) = config.cron.scheduler_interval {
        IndexerScheduler::new(jobs.clone(), period).start();
    }

    let rate_limiter = ip_rate_limiter(config.cron.rate_limit_per_minute);
    spawn_rate_limiter_gc(rate_limiter.clone(), Duration::from_secs(60));
    if config.cron.trust_proxy_headers {
        tracing::info!("🛡️  Rate limit keyed by proxy headers (TRUST_PROXY_HEADERS)");
    }

    // 앱 상태 구성
    let state = AppState {
        repo: db,
        chain,
        jobs,
        rate_limiter,
        config: Arc::new(config.clone()),
    };

    // 라우터 구성
    let app = routes::create_router(state);

    // 서버 시작
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🌐 Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    // rate limit이 소켓 주소를 쓸 수 있도록 ConnectInfo 제공
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
