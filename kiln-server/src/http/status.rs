use axum::extract::State;
use axum::Json;
use kiln_core::domain::RateLimiterStatus;
use kiln_core::metrics_aggregator::MetricsSummary;
use kiln_core::worker_supervisor::WorkerStats;
use serde::Serialize;

use super::error::ApiResult;
use super::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub rate_limiter: RateLimiterStatus,
    pub workers: WorkerStats,
}

pub async fn status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let rate_limiter = state.rate_limiter.get_status().await?;
    let workers = state.supervisor.get_stats().await?;
    Ok(Json(StatusResponse { rate_limiter, workers }))
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult<Json<MetricsSummary>> {
    Ok(Json(state.metrics.get_summary().await?))
}

/// `learnings` and `pr_reviews` are collaborator-owned (§6): this kernel
/// attaches the foreign key and never reads them back, so the endpoint has
/// nothing of its own to report.
pub async fn learnings() -> Json<Vec<serde_json::Value>> {
    Json(Vec::new())
}
