//! Review queue endpoints used by human and automated reviewers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    error::PostingError,
    models::{ReviewTask, TaskKind, TaskStatus},
    services::ReviewDecision,
    startup::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub worker_id: String,
    /// Kinds the worker handles. Empty means every kind.
    #[serde(default)]
    pub kinds: Vec<TaskKind>,
}

/// Claim the next task. `204 No Content` when the queue is empty.
pub async fn claim_task(
    State(state): State<AppState>,
    Json(payload): Json<ClaimRequest>,
) -> Result<Response, AppError> {
    let kinds = if payload.kinds.is_empty() {
        vec![TaskKind::PostingReview, TaskKind::MatchReview]
    } else {
        payload.kinds
    };

    match state
        .engine
        .queue()
        .claim_next(&payload.worker_id, &kinds)
        .await?
    {
        Some(task) => Ok(Json(task).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub worker_id: String,
    #[serde(flatten)]
    pub decision: ReviewDecision,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub task_id: Uuid,
    pub voucher_id: Option<Uuid>,
}

pub async fn resolve_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, AppError> {
    let voucher_id = state
        .engine
        .resolve_review(task_id, &payload.worker_id, payload.decision)
        .await?;
    Ok(Json(ResolveResponse {
        task_id,
        voucher_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub worker_id: String,
}

pub async fn release_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<ReleaseRequest>,
) -> Result<StatusCode, AppError> {
    state
        .engine
        .queue()
        .release(task_id, &payload.worker_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_task(
    State(state): State<AppState>,
    Path((tenant_id, task_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ReviewTask>, AppError> {
    state
        .engine
        .queue()
        .get_task(tenant_id, task_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            PostingError::NotFound {
                entity: "task",
                id: task_id,
            }
            .into()
        })
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<ReviewTask>>, AppError> {
    let limit = query.limit.clamp(1, 500);
    let tasks = state
        .engine
        .queue()
        .list_tasks(tenant_id, query.status, limit)
        .await?;
    Ok(Json(tasks))
}
