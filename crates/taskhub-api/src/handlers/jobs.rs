//! Job queue handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use uuid::Uuid;

use taskhub_core::error::AppError;
use taskhub_entity::job::Job;
use taskhub_worker::queue::QueueStats;

use crate::dto::request::EnqueueJobRequest;
use crate::dto::response::{ApiResponse, EnqueuedJobResponse};
use crate::error::ApiError;
use crate::state::AppState;

/// POST /api/jobs
pub async fn enqueue(
    State(state): State<AppState>,
    Json(req): Json<EnqueueJobRequest>,
) -> Result<(StatusCode, Json<ApiResponse<EnqueuedJobResponse>>), ApiError> {
    let options = req.options();
    let id = state
        .queue
        .enqueue(&req.queue, &req.kind, req.payload, options)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(EnqueuedJobResponse { id })),
    ))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Job>>, ApiError> {
    let job = state
        .queue
        .find(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
    Ok(Json(ApiResponse::ok(job)))
}

/// GET /api/queues
pub async fn list_queues(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<QueueStats>>>, ApiError> {
    let stats = state.queue.stats().await?;
    Ok(Json(ApiResponse::ok(stats)))
}
