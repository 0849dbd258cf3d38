use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use kiln_core::domain::{Priority, WorkItem, WorkItemType};
use kiln_core::error::KernelError;
use kiln_core::queue_manager::SubmitRequest;
use serde::Deserialize;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    pub repo: String,
    pub spec: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub source_ref: Option<String>,
    pub priority: Option<Priority>,
}

pub async fn submit(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> ApiResult<(StatusCode, Json<WorkItem>)> {
    let item = state
        .queue
        .add(SubmitRequest {
            repo: body.repo,
            spec: body.spec,
            description: body.description,
            source: body.source,
            source_ref: body.source_ref,
            priority: body.priority,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<WorkItem>> {
    Ok(Json(state.queue.get(id).await?))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub item_type: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<WorkItem>>> {
    let type_filter = match query.item_type {
        Some(s) => Some(
            WorkItemType::parse(&s)
                .ok_or_else(|| ApiError(KernelError::validation(format!("unknown type {s}"))))?,
        ),
        None => None,
    };
    Ok(Json(state.queue.list(type_filter).await?))
}

#[derive(serde::Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    let cancelled = state.queue.cancel(id).await?;
    Ok(Json(CancelResponse { cancelled }))
}

pub async fn requeue(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<WorkItem>> {
    Ok(Json(state.queue.requeue(id).await?))
}
