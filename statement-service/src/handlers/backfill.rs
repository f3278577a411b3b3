use crate::dtos::{BackfillJobResponse, BackfillRequest};
use crate::middleware::OrgId;
use crate::startup::AppState;
use crate::workers::backfill;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

/// Start a historical backfill for one account. Range validation happens
/// before anything is queued, so a bad range is a synchronous 422.
pub async fn start_backfill(
    State(state): State<AppState>,
    org_id: OrgId,
    Path(account_id): Path<String>,
    Json(request): Json<BackfillRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (job, tasks) = backfill::start_backfill(
        &state.store,
        &org_id.0,
        &account_id,
        request.range_start,
        request.range_end,
    )
    .await?;

    for task in tasks {
        state
            .handles
            .detect_tx
            .send(task)
            .await
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("detection queue closed")))?;
    }

    Ok((StatusCode::ACCEPTED, Json(BackfillJobResponse::from(job))))
}

pub async fn get_backfill(
    State(state): State<AppState>,
    org_id: OrgId,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let job = state
        .store
        .get_backfill_job(&job_id)
        .await?
        .filter(|j| j.org_id == org_id.0)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Backfill job not found")))?;
    Ok(Json(BackfillJobResponse::from(job)))
}

pub async fn cancel_backfill(
    State(state): State<AppState>,
    org_id: OrgId,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    // Ownership check before the cancel so foreign jobs 404 rather than 409.
    state
        .store
        .get_backfill_job(&job_id)
        .await?
        .filter(|j| j.org_id == org_id.0)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Backfill job not found")))?;

    let job = backfill::cancel_backfill(&state.store, &job_id).await?;
    Ok(Json(BackfillJobResponse::from(job)))
}
