//! Thin async HTTP router over the kernel façade (§6). Handlers
//! deserialize the body, call exactly one kernel operation, and translate
//! its `KernelError` through `error::ApiError` — no handler builds an
//! error body directly, mirroring `fourthplaces-mntogether`'s
//! `server::app::build_app`/`Extension<AppState>` shape.

mod error;
mod state;
mod status;
mod work_items;
mod workers;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/work-items", post(work_items::submit).get(work_items::list))
        .route("/work-items/:id", get(work_items::get))
        .route("/work-items/:id/cancel", post(work_items::cancel))
        .route("/work-items/:id/requeue", post(work_items::requeue))
        .route("/workers", get(workers::list))
        .route("/workers/register", post(workers::register))
        .route("/workers/:id/heartbeat", post(workers::heartbeat))
        .route("/workers/:id/locks/acquire", post(workers::acquire_locks))
        .route("/workers/:id/locks/release", post(workers::release_locks))
        .route("/workers/:id/complete", post(workers::complete))
        .route("/workers/:id/fail", post(workers::fail))
        .route("/workers/:id/stuck", post(workers::stuck))
        .route("/workers/:id/kill", post(workers::kill))
        .route("/status", get(status::status))
        .route("/metrics", get(status::metrics))
        .route("/learnings", get(status::learnings))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
