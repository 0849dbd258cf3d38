//! Composition root: wires one Persistence Gateway, one fast-store client,
//! one container runtime, one Rate Limiter, one Conflict Arbiter, one
//! Queue Manager, one Worker Supervisor, and starts exactly one Scheduler
//! Loop task and one HTTP listener (§9/§10) — grounded on
//! `fourthplaces-mntogether/packages/server/src/server/main.rs`'s
//! load-config → connect → build-app → serve shape.

use std::sync::Arc;

use anyhow::{Context, Result};
use kiln_core::conflict_arbiter::ConflictArbiter;
use kiln_core::container_runtime::BollardRuntime;
use kiln_core::fast_store::RedisFastStore;
use kiln_core::gateway::PersistenceGateway;
use kiln_core::metrics_aggregator::MetricsAggregator;
use kiln_core::queue_manager::QueueManager;
use kiln_core::rate_limiter::{RateLimiter, RateLimiterConfig};
use kiln_core::worker_supervisor::WorkerSupervisor;
use kiln_core::KernelConfig;
use kiln_server::{http, scheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = KernelConfig::load().context("failed to load kernel configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},sqlx=warn", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting kiln orchestration kernel");

    let gateway = Arc::new(
        PersistenceGateway::connect(&config.database_url)
            .await
            .context("failed to connect to the durable store")?,
    );

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(gateway.pool())
        .await
        .context("failed to run database migrations")?;

    let fast_store = Arc::new(
        RedisFastStore::connect(&config.redis_url).context("failed to connect to the fast store")?,
    );

    let containers = Arc::new(BollardRuntime::connect().context("failed to connect to the container runtime")?);

    let rate_limiter = Arc::new(RateLimiter::new(
        fast_store,
        RateLimiterConfig {
            max_workers: config.max_workers,
            daily_budget: config.daily_budget,
            cooldown_seconds: config.cooldown_seconds,
        },
    ));
    let conflict_arbiter = Arc::new(ConflictArbiter::new(gateway.clone()));
    let queue = Arc::new(QueueManager::new(gateway.clone()));
    let metrics = Arc::new(MetricsAggregator::new(gateway.clone()));
    let supervisor = Arc::new(WorkerSupervisor::new(
        gateway.clone(),
        rate_limiter.clone(),
        conflict_arbiter.clone(),
        containers,
        queue.clone(),
        config.clone(),
    ));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let scheduler = scheduler::SchedulerLoop::new(
        queue.clone(),
        supervisor.clone(),
        rate_limiter.clone(),
        config.scheduler_tick_seconds,
    );
    let scheduler_handle = scheduler.spawn(shutdown_tx.subscribe());

    let app_state = http::AppState { queue, supervisor, conflict_arbiter, rate_limiter, metrics };
    let app = http::build_app(app_state);

    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind_addr))?;
    tracing::info!(addr = %config.http_bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(());
    let _ = scheduler_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
