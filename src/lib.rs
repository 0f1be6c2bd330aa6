//! Lending Indexer Library
//!
//! # Overview
//!
//! 대출 상환 이벤트를 인덱싱해서 lending pool에 yield를 분배하고,
//! Cartesi rollup이 검증한 DSCR 결과를 온체인 oracle로 relay 하는 백엔드.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   Bearer + rate limit   ┌──────────────────────────────┐
//! │ External cron│ ──────────────────────► │            Routes            │
//! └──────────────┘                         │  /api/cron/distribute-yield  │
//!   (or in-process IndexerScheduler)       │  /api/cron/relay-notices     │
//!                                          └──────────────┬───────────────┘
//!                                                         │ with_lock
//!                         ┌───────────────────────────────┴───────────────┐
//!                         ▼                                               ▼
//!                ┌──────────────────┐                           ┌──────────────────┐
//!                │ YieldDistributor │                           │   NoticeRelay    │
//!                │ scan → match →   │                           │ GraphQL → decode │
//!                │ guard → submit   │                           │ → guard → relay  │
//!                └───┬─────────┬────┘                           └───┬─────────┬────┘
//!                    │         │                                    │         │
//!                    ▼         ▼                                    ▼         ▼
//!               ┌────────┐ ┌──────────┐                        ┌────────┐ ┌──────────┐
//!               │  RPC   │ │ Postgres │ ◄───── watermarks ────►│Cartesi │ │   RPC    │
//!               └────────┘ └──────────┘                        └────────┘ └──────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: 에러 타입 및 처리
//! - `middleware`: cron 인증, IP rate limit
//! - `routes`: HTTP 엔드포인트 핸들러
//! - `services`: 파이프라인 (yield 분배, notice relay, 락, 스케줄러)
//! - `db`: 데이터베이스 연동
//! - `types`: 공통 타입 정의
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lending_indexer::{config::Config, db::Database, services::YieldDistributor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Arc::new(Database::connect(&config.database_url).await?);
//!     let chain = Arc::new(EthersChainClient::new(&config.chain)?);
//!     let summary = YieldDistributor::new(db, chain, config.indexer.clone()).run().await?;
//!     println!("watermark = {:?}", summary.watermark);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use db::Database;
pub use error::ApiError;

use db::IndexerRepository;
use middleware::IpRateLimiter;
use services::{ChainClient, IndexerJobs};

/// 애플리케이션 전역 상태
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn IndexerRepository>,
    pub chain: Arc<dyn ChainClient>,
    pub jobs: Arc<IndexerJobs>,
    pub rate_limiter: Arc<IpRateLimiter>,
    pub config: Arc<Config>,
}
