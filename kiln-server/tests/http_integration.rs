//! Router-level integration tests exercising `build_app` end to end through
//! `tower::ServiceExt::oneshot`, in place of spinning up a real listener —
//! the same style `fourthplaces-mntogether`'s axum services are tested in,
//! scaled down to this kernel's much smaller surface.
//!
//! These need a live Postgres (the Persistence Gateway has no in-memory
//! mode — a relational unique index is load-bearing for the Conflict
//! Arbiter and the queue's admission logic) so they run through
//! `#[sqlx::test]` and are `#[ignore]`d by default, matching the rest of
//! the workspace's store-backed tests.

use std::sync::Arc;

use http_body_util::BodyExt;
use kiln_core::conflict_arbiter::ConflictArbiter;
use kiln_core::container_runtime::mock::MockContainerRuntime;
use kiln_core::fast_store::InMemoryFastStore;
use kiln_core::gateway::PersistenceGateway;
use kiln_core::metrics_aggregator::MetricsAggregator;
use kiln_core::queue_manager::QueueManager;
use kiln_core::rate_limiter::{RateLimiter, RateLimiterConfig};
use kiln_core::worker_supervisor::WorkerSupervisor;
use kiln_core::KernelConfig;
use kiln_server::http::{build_app, AppState};
use sqlx::PgPool;
use tower::ServiceExt;

fn test_config() -> KernelConfig {
    KernelConfig {
        max_workers: 2,
        daily_budget: 200,
        cooldown_seconds: 60,
        stale_threshold_seconds: 300,
        worker_image: "ghcr.io/kiln/worker:test".to_string(),
        orchestrator_url: "http://localhost:8080".to_string(),
        verification_max_retries: 3,
        scheduler_tick_seconds: 5,
        http_bind_addr: "127.0.0.1:0".to_string(),
        database_url: String::new(),
        redis_url: "redis://127.0.0.1:6379".to_string(),
        log_level: "info".to_string(),
        container_memory_mib: 4096,
        container_cpu_cores: 2.0,
        container_pid_limit: 256,
    }
}

fn app_for(pool: PgPool) -> axum::Router {
    let gateway = Arc::new(PersistenceGateway::from_pool(pool));
    let fast_store = Arc::new(InMemoryFastStore::new());
    let containers = Arc::new(MockContainerRuntime::default());
    let rate_limiter = Arc::new(RateLimiter::new(
        fast_store,
        RateLimiterConfig {
            max_workers: 2,
            daily_budget: 200,
            cooldown_seconds: 60,
        },
    ));
    let conflict_arbiter = Arc::new(ConflictArbiter::new(gateway.clone()));
    let queue = Arc::new(QueueManager::new(gateway.clone()));
    let metrics = Arc::new(MetricsAggregator::new(gateway.clone()));
    let supervisor = Arc::new(WorkerSupervisor::new(
        gateway,
        rate_limiter.clone(),
        conflict_arbiter.clone(),
        containers,
        queue.clone(),
        test_config(),
    ));

    build_app(AppState { queue, supervisor, conflict_arbiter, rate_limiter, metrics })
}

#[ignore]
#[sqlx::test(migrations = "./migrations")]
async fn submit_then_get_round_trips(pool: PgPool) {
    let app = app_for(pool);

    let submit = app
        .clone()
        .oneshot(
            axum::http::Request::post("/work-items")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    serde_json::json!({ "repo": "o/r", "description": "do the thing" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(submit.status(), axum::http::StatusCode::CREATED);

    let body = submit.into_body().collect().await.unwrap().to_bytes();
    let item: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let id = item["id"].as_str().unwrap();
    assert_eq!(item["status"], "queued");

    let get = app
        .clone()
        .oneshot(
            axum::http::Request::get(format!("/work-items/{id}"))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(get.status(), axum::http::StatusCode::OK);
}

#[ignore]
#[sqlx::test(migrations = "./migrations")]
async fn get_unknown_work_item_is_not_found(pool: PgPool) {
    let app = app_for(pool);

    let resp = app
        .oneshot(
            axum::http::Request::get(format!("/work-items/{}", uuid::Uuid::new_v4()))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);

    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let err: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(err["code"], "NOT_FOUND");
}

#[ignore]
#[sqlx::test(migrations = "./migrations")]
async fn submit_rejects_unknown_list_type_filter(pool: PgPool) {
    let app = app_for(pool);

    let resp = app
        .oneshot(
            axum::http::Request::get("/work-items?type=not-a-type")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::BAD_REQUEST);
}

#[ignore]
#[sqlx::test(migrations = "./migrations")]
async fn status_endpoint_reports_zero_workers_when_idle(pool: PgPool) {
    let app = app_for(pool);

    let resp = app
        .oneshot(
            axum::http::Request::get("/status")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);

    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    for field in ["starting", "running", "completed", "failed", "stuck", "killed"] {
        assert_eq!(status["workers"][field], 0, "expected {field} to be zero with no workers");
    }
}
