//! API Routes Module
//!
//! 모든 HTTP 엔드포인트 정의
//!
//! # Routes
//! - `/health` - 헬스 체크 (인증 없음)
//! - `/api/cron/distribute-yield` - yield 분배 실행
//! - `/api/cron/relay-notices` - DSCR notice relay 실행
//! - `/api/indexer/status` - watermark 조회

pub mod cron;
pub mod health;
pub mod status;

use axum::{
    http::{header, Method},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::middleware::{rate_limit, require_cron_secret};
use crate::AppState;

/// 라우터 생성
///
/// # Route Structure
///
/// ```text
/// GET       /health                      - 서버/DB/RPC 상태
///
/// GET       /api/cron/distribute-yield   - Bearer CRON_SECRET
/// GET|POST  /api/cron/relay-notices      - Bearer CRON_SECRET
/// GET       /api/indexer/status          - Bearer CRON_SECRET
/// ```
pub fn create_router(state: AppState) -> Router {
    // route_layer는 나중에 추가한 것이 바깥 → rate limit이 인증보다 먼저
    let protected = Router::new()
        .route("/api/cron/distribute-yield", get(cron::distribute_yield))
        .route(
            "/api/cron/relay-notices",
            get(cron::relay_notices).post(cron::relay_notices),
        )
        .route("/api/indexer/status", get(status::indexer_status))
        .route_layer(from_fn_with_state(state.clone(), require_cron_secret))
        .route_layer(from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .with_state(state)
}

/// 프로덕션은 cross-origin 허용 안 함 (호출자는 서버 측 cron)
fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if config.is_production() {
        cors
    } else {
        cors.allow_origin(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::{ChainSettings, CronSettings, Environment, LockBackend, RelaySettings};
    use crate::db::mock::MockRepository;
    use crate::middleware::{ip_rate_limiter, IpRateLimiter};
    use crate::services::chain::mock::MockChain;
    use crate::services::jobs::testing::{indexer_settings, jobs, TTL};
    use crate::services::lock::{DistributedLock, MemoryLock};
    use crate::services::notice::mock::MockNoticeSource;

    const SECRET: &str = "test-cron-secret";

    fn config(secret: Option<&str>, rate_limit_per_minute: u32) -> Config {
        Config {
            port: 3001,
            database_url: "postgres://localhost/test".to_string(),
            environment: Environment::Development,
            chain: ChainSettings {
                rpc_url: "http://localhost:8545".to_string(),
                chain_id: 31337,
                relayer_private_key: None,
                loan_pool_address: "0x00000000000000000000000000000000000000aa".to_string(),
                dscr_oracle_address: None,
            },
            indexer: indexer_settings(),
            relay: RelaySettings {
                graphql_url: "http://localhost:8080/graphql".to_string(),
                page_size: 50,
            },
            cron: CronSettings {
                secret: secret.map(str::to_string),
                rate_limit_per_minute,
                trust_proxy_headers: false,
                lock_backend: LockBackend::Memory,
                lock_ttl: TTL,
                scheduler_interval: None,
            },
        }
    }

    struct TestApp {
        router: Router,
        repo: Arc<MockRepository>,
        chain: Arc<MockChain>,
        lock: Arc<MemoryLock>,
        rate_limiter: Arc<IpRateLimiter>,
    }

    impl TestApp {
        fn rate_limiter_keys(&self) -> usize {
            self.rate_limiter.len()
        }
    }

    fn app_with(
        repo: MockRepository,
        chain: MockChain,
        secret: Option<&str>,
        rate_limit_per_minute: u32,
    ) -> TestApp {
        let repo = Arc::new(repo);
        let chain = Arc::new(chain);
        let lock = Arc::new(MemoryLock::new());
        let config = config(secret, rate_limit_per_minute);
        let rate_limiter = ip_rate_limiter(config.cron.rate_limit_per_minute);

        let state = AppState {
            repo: repo.clone(),
            chain: chain.clone(),
            jobs: Arc::new(jobs(repo.clone(), chain.clone(), MockNoticeSource::new(), lock.clone())),
            rate_limiter: rate_limiter.clone(),
            config: Arc::new(config),
        };

        TestApp {
            router: create_router(state),
            repo,
            chain,
            lock,
            rate_limiter,
        }
    }

    fn app(secret: Option<&str>, rate_limit_per_minute: u32) -> TestApp {
        app_with(
            MockRepository::new().with_loan("loan-a", "pool-1"),
            MockChain::new(200).with_repayment("loan-a", 120, 500),
            secret,
            rate_limit_per_minute,
        )
    }

    fn request(method: &str, uri: &str, bearer: Option<&str>) -> Request<Body> {
        request_from(method, uri, bearer, "203.0.113.9")
    }

    /// 같은 소켓 주소에서 `x-forwarded-for`만 다르게
    fn request_from(method: &str, uri: &str, bearer: Option<&str>, forwarded_for: &str) -> Request<Body> {
        let peer: SocketAddr = "198.51.100.20:40000".parse().unwrap();
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", forwarded_for)
            .extension(ConnectInfo(peer));
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_bearer_is_unauthorized() {
        let app = app(Some(SECRET), 100);

        let response = app
            .router
            .oneshot(request("GET", "/api/cron/distribute-yield", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert!(app.chain.scanned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_bearer_is_unauthorized() {
        let app = app(Some(SECRET), 100);

        let response = app
            .router
            .oneshot(request("GET", "/api/cron/distribute-yield", Some("guess")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unset_secret_disables_cron() {
        let app = app(None, 100);

        let response = app
            .router
            .oneshot(request("GET", "/api/cron/distribute-yield", Some("")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["code"], "CRON_DISABLED");
    }

    #[tokio::test]
    async fn test_distribute_yield_runs_with_bearer() {
        let app = app(Some(SECRET), 100);

        let response = app
            .router
            .oneshot(request("GET", "/api/cron/distribute-yield", Some(SECRET)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["fromBlock"], 100);
        assert_eq!(body["toBlock"], 200);
        assert_eq!(body["watermark"], 200);
        assert_eq!(body["results"]["distributed"], 1);
        assert!(body["durationMs"].is_u64());
        assert_eq!(app.repo.completed_distributions().len(), 1);
    }

    #[tokio::test]
    async fn test_contended_lock_returns_skipped() {
        let app = app(Some(SECRET), 100);
        app.lock.acquire("yield_distribution", TTL).await.unwrap().unwrap();

        let response = app
            .router
            .oneshot(request("GET", "/api/cron/distribute-yield", Some(SECRET)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["skipped"], true);
        assert_eq!(app.chain.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_relay_notices_accepts_post() {
        let app = app(Some(SECRET), 100);

        let response = app
            .router
            .oneshot(request("POST", "/api/cron/relay-notices", Some(SECRET)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["relayedCount"], 0);
        assert_eq!(body["skippedCount"], 0);
        assert_eq!(body["failedCount"], 0);
        assert!(body["cursor"].is_null());
    }

    #[tokio::test]
    async fn test_job_failure_is_500() {
        let mut chain = MockChain::new(200);
        chain.can_submit = false;
        let app = app_with(MockRepository::new(), chain, Some(SECRET), 100);

        let response = app
            .router
            .oneshot(request("GET", "/api/cron/distribute-yield", Some(SECRET)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("RELAYER_PRIVATE_KEY"));
    }

    #[tokio::test]
    async fn test_rate_limit_applies_before_auth() {
        let app = app(Some(SECRET), 2);

        for _ in 0..2 {
            let response = app
                .router
                .clone()
                .oneshot(request("GET", "/api/cron/distribute-yield", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/api/cron/distribute-yield", Some(SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_rotating_forwarded_for_is_still_limited() {
        let app = app(Some(SECRET), 2);

        for spoofed in ["1.1.1.1", "2.2.2.2"] {
            let response = app
                .router
                .clone()
                .oneshot(request_from("GET", "/api/indexer/status", Some(SECRET), spoofed))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .router
            .clone()
            .oneshot(request_from("GET", "/api/indexer/status", Some(SECRET), "3.3.3.3"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(app.rate_limiter_keys(), 1);
    }

    #[tokio::test]
    async fn test_job_survives_dropped_request() {
        let mut chain = MockChain::new(200).with_repayment("loan-a", 120, 500);
        chain.send_delay = Some(Duration::from_millis(100));
        let app = app_with(
            MockRepository::new().with_loan("loan-a", "pool-1"),
            chain,
            Some(SECRET),
            100,
        );

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            app.router
                .clone()
                .oneshot(request("GET", "/api/cron/distribute-yield", Some(SECRET))),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(app.repo.completed_distributions().len(), 1);
        assert_eq!(app.repo.watermark(crate::types::IndexerStream::YieldDistribution), Some(200));
        assert!(app.lock.acquire("yield_distribution", TTL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = app(None, 1);

        let response = app
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["chain"]["head_block"], 200);
    }

    #[tokio::test]
    async fn test_status_lists_watermarks() {
        let app = app(Some(SECRET), 100);

        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/api/cron/distribute-yield", Some(SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .router
            .oneshot(request("GET", "/api/indexer/status", Some(SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["watermarks"][0]["stream"], "yield_distribution");
        assert_eq!(body["watermarks"][0]["lastProcessed"], 200);
    }
}
