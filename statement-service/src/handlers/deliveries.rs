use crate::dtos::DeliveryResponse;
use crate::middleware::OrgId;
use crate::startup::AppState;
use crate::workers::DeliveryTask;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

/// Manual resync of a terminally failed delivery: resets the attempt counter
/// and puts the row straight back on the queue. 409 unless the row is in
/// `failed`.
pub async fn retry_delivery(
    State(state): State<AppState>,
    org_id: OrgId,
    Path(delivery_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .store
        .get_delivery(&delivery_id)
        .await?
        .filter(|d| d.org_id == org_id.0)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Delivery not found")))?;

    let delivery = state.store.reset_delivery(&delivery_id).await?;

    state
        .handles
        .delivery_tx
        .send(DeliveryTask {
            delivery_id: delivery.id.clone(),
        })
        .await
        .map_err(|_| AppError::InternalError(anyhow::anyhow!("delivery queue closed")))?;

    tracing::info!(delivery_id = %delivery.id, "Manual delivery retry queued");
    Ok((StatusCode::ACCEPTED, Json(DeliveryResponse::from(delivery))))
}
