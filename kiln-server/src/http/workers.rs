use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use kiln_core::conflict_arbiter::LockAcquisition;
use kiln_core::domain::{WorkItem, Worker};
use kiln_core::worker_supervisor::{CompletePayload, MetricsInput};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiResult;
use super::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub work_item_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub worker_id: Uuid,
    pub work_item: WorkItem,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let (worker, work_item) = state.supervisor.register(body.work_item_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { worker_id: worker.id, work_item }),
    ))
}

#[derive(Deserialize)]
pub struct HeartbeatBody {
    pub iteration: u32,
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(worker_id): Path<Uuid>,
    Json(body): Json<HeartbeatBody>,
) -> ApiResult<Json<Worker>> {
    Ok(Json(state.supervisor.heartbeat(worker_id, body.iteration).await?))
}

#[derive(Deserialize)]
pub struct LockBody {
    pub repo: String,
    pub files: Vec<String>,
}

pub async fn acquire_locks(
    State(state): State<AppState>,
    Path(worker_id): Path<Uuid>,
    Json(body): Json<LockBody>,
) -> ApiResult<Json<LockAcquisition>> {
    let result = state
        .conflict_arbiter
        .acquire_locks(worker_id, &body.repo, &body.files)
        .await?;
    Ok(Json(result))
}

pub async fn release_locks(
    State(state): State<AppState>,
    Path(worker_id): Path<Uuid>,
    Json(body): Json<LockBody>,
) -> ApiResult<StatusCode> {
    state
        .conflict_arbiter
        .release_locks(worker_id, &body.repo, &body.files)
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteBody {
    pub pr_url: Option<String>,
    pub pr_number: Option<u64>,
    pub verification_passed: Option<bool>,
    pub metrics: Option<MetricsInput>,
    pub review: Option<serde_json::Value>,
    #[serde(default)]
    pub verification_enabled: bool,
}

pub async fn complete(
    State(state): State<AppState>,
    Path(worker_id): Path<Uuid>,
    Json(body): Json<CompleteBody>,
) -> ApiResult<Json<WorkItem>> {
    let payload = CompletePayload {
        pr_url: body.pr_url,
        pr_number: body.pr_number,
        verification_passed: body.verification_passed,
        metrics: body.metrics,
        review: body.review,
        verification_enabled: body.verification_enabled,
    };
    Ok(Json(state.supervisor.complete(worker_id, payload).await?))
}

#[derive(Deserialize)]
pub struct FailBody {
    pub error: String,
    pub iteration: u32,
}

pub async fn fail(
    State(state): State<AppState>,
    Path(worker_id): Path<Uuid>,
    Json(body): Json<FailBody>,
) -> ApiResult<Json<WorkItem>> {
    Ok(Json(
        state.supervisor.fail(worker_id, &body.error, body.iteration).await?,
    ))
}

#[derive(Deserialize)]
pub struct StuckBody {
    pub reason: String,
    pub attempts: u32,
}

pub async fn stuck(
    State(state): State<AppState>,
    Path(worker_id): Path<Uuid>,
    Json(body): Json<StuckBody>,
) -> ApiResult<StatusCode> {
    state.supervisor.stuck(worker_id, &body.reason, body.attempts).await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct KillBody {
    pub reason: String,
}

pub async fn kill(
    State(state): State<AppState>,
    Path(worker_id): Path<Uuid>,
    Json(body): Json<KillBody>,
) -> ApiResult<Json<WorkItem>> {
    Ok(Json(state.supervisor.kill(worker_id, &body.reason).await?))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Worker>>> {
    Ok(Json(state.supervisor.list().await?))
}
