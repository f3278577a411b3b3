use crate::dtos::{CreateDestinationRequest, DestinationResponse};
use crate::middleware::OrgId;
use crate::models::{Destination, DestinationKind, DestinationStatus};
use crate::services::connectors::WebhookConnector;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

pub async fn list_destinations(
    State(state): State<AppState>,
    org_id: OrgId,
) -> Result<impl IntoResponse, AppError> {
    let destinations = state.store.list_destinations(&org_id.0).await?;
    Ok(Json(
        destinations
            .into_iter()
            .map(DestinationResponse::from)
            .collect::<Vec<_>>(),
    ))
}

pub async fn create_destination(
    State(state): State<AppState>,
    org_id: OrgId,
    Json(request): Json<CreateDestinationRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let mut config = request.config;

    // Secrets arrive in plaintext and leave this scope only as ciphertext.
    match request.kind {
        DestinationKind::Webhook => {
            if config.get("url").map_or(true, |u| u.is_empty()) {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "webhook destination requires a url"
                )));
            }
            let secret = config.remove("secret").ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("webhook destination requires a secret"))
            })?;
            config.insert("secret_enc".to_string(), state.vault.encrypt(&secret)?);
        }
        _ => {
            let token = config.remove("access_token").ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "cloud storage destination requires an access_token"
                ))
            })?;
            config.insert("access_token_enc".to_string(), state.vault.encrypt(&token)?);
        }
    }

    let destination = Destination::new(org_id.0, request.kind, request.name, config);
    state.store.insert_destination(destination.clone()).await?;

    tracing::info!(
        destination_id = %destination.id,
        kind = ?destination.kind,
        "Destination created"
    );
    Ok((
        StatusCode::CREATED,
        Json(DestinationResponse::from(destination)),
    ))
}

/// Connectivity check: a signed ping for webhooks, a lightweight API probe
/// for cloud storage. The result is reflected in the destination status.
pub async fn test_destination(
    State(state): State<AppState>,
    org_id: OrgId,
    Path(destination_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let destination = state
        .store
        .get_destination(&destination_id)
        .await?
        .filter(|d| d.org_id == org_id.0)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Destination not found")))?;

    let result = match destination.kind {
        DestinationKind::Webhook => ping_webhook(&state, &destination).await,
        _ => {
            let connector = state.delivery_engine.storage_connector(&destination)?;
            connector.probe().await
        }
    };

    match result {
        Ok(()) => {
            state
                .store
                .update_destination_status(&destination.id, DestinationStatus::Active)
                .await?;
            Ok(Json(serde_json::json!({ "status": "ok" })))
        }
        Err(e) => {
            state
                .store
                .update_destination_status(&destination.id, DestinationStatus::Error)
                .await?;
            Err(e)
        }
    }
}

async fn ping_webhook(state: &AppState, destination: &Destination) -> Result<(), AppError> {
    let url = destination.config_value("url").ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("webhook destination has no url"))
    })?;
    let secret_enc = destination.config_value("secret_enc").ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("webhook destination has no secret"))
    })?;
    let secret = state.vault.decrypt(secret_enc)?;

    let request_id = uuid::Uuid::new_v4().to_string();
    let payload = serde_json::json!({
        "event": "ping",
        "destination_id": destination.id,
        "request_id": request_id,
    });

    WebhookConnector::new(state.http.clone())
        .send(url, &secret, &request_id, &payload)
        .await
}
