use crate::models::ConnectionStatus;
use crate::services::notifier::PipelineEvent;
use crate::startup::AppState;
use crate::workers::{DetectionTask, SyncTask};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use service_core::error::AppError;
use service_core::utils::signature::verify_payload;

#[derive(Debug, Deserialize)]
struct InboundEvent {
    webhook_type: String,
    webhook_code: String,
    item_id: String,
}

/// Inbound aggregator webhook. The HMAC signature is verified over the raw
/// body before anything is parsed; a bad or missing signature is a 401.
/// Events only nudge the queues, so replays and duplicates are harmless.
pub async fn aggregator_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get("X-Aggregator-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing X-Aggregator-Signature header"))
        })?;

    if !verify_payload(&state.config.aggregator.secret, &body, signature) {
        metrics::counter!("aggregator_webhook_rejected").increment(1);
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let event: InboundEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Malformed webhook body: {}", e)))?;

    let Some(connection) = state.store.get_connection_by_item(&event.item_id).await? else {
        // Unknown item: acknowledge so the aggregator stops retrying.
        tracing::warn!(item_id = %event.item_id, "Webhook for unknown item");
        return Ok(StatusCode::OK);
    };

    metrics::counter!("aggregator_webhook_received", "type" => event.webhook_type.clone())
        .increment(1);

    match event.webhook_type.as_str() {
        "STATEMENTS" => {
            let _ = state.handles.sync_tx.try_send(SyncTask {
                connection_id: connection.id.clone(),
            });
            for account in state
                .store
                .list_accounts_for_connection(&connection.id)
                .await?
            {
                if account.is_detectable() {
                    let _ = state
                        .handles
                        .detect_tx
                        .try_send(DetectionTask::poll(account.id));
                }
            }
        }
        "ITEM" => match event.webhook_code.as_str() {
            "ERROR" | "PENDING_EXPIRATION" | "USER_PERMISSION_REVOKED" => {
                state
                    .store
                    .update_connection_status(
                        &connection.id,
                        ConnectionStatus::ReauthRequired,
                        Some(event.webhook_code.clone()),
                    )
                    .await?;
                state
                    .notifier
                    .notify(PipelineEvent::ConnectionNeedsRelink {
                        connection_id: connection.id.clone(),
                        institution_name: connection.institution_name.clone(),
                    })
                    .await;
            }
            other => {
                tracing::debug!(code = %other, "Ignoring item webhook code");
            }
        },
        other => {
            tracing::debug!(webhook_type = %other, "Ignoring webhook type");
        }
    }

    Ok(StatusCode::OK)
}
