use crate::dtos::AccountResponse;
use crate::middleware::OrgId;
use crate::models::Account;
use crate::startup::AppState;
use crate::workers::{DetectionTask, SyncTask};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

pub async fn list_accounts(
    State(state): State<AppState>,
    org_id: OrgId,
) -> Result<impl IntoResponse, AppError> {
    let accounts = state.store.list_accounts(&org_id.0).await?;
    Ok(Json(
        accounts
            .into_iter()
            .map(AccountResponse::from)
            .collect::<Vec<_>>(),
    ))
}

pub async fn get_account(
    State(state): State<AppState>,
    org_id: OrgId,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let account = load_owned_account(&state, &org_id.0, &account_id).await?;
    Ok(Json(AccountResponse::from(account)))
}

/// Enqueue a sync of the account's connection plus a statement check for the
/// account itself. Both run asynchronously; 202 means "queued".
pub async fn trigger_sync(
    State(state): State<AppState>,
    org_id: OrgId,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let account = load_owned_account(&state, &org_id.0, &account_id).await?;

    state
        .handles
        .sync_tx
        .send(SyncTask {
            connection_id: account.connection_id.clone(),
        })
        .await
        .map_err(|_| AppError::InternalError(anyhow::anyhow!("sync queue closed")))?;
    state
        .handles
        .detect_tx
        .send(DetectionTask::poll(account.id.clone()))
        .await
        .map_err(|_| AppError::InternalError(anyhow::anyhow!("detection queue closed")))?;

    tracing::info!(account_id = %account.id, "On-demand sync queued");
    Ok(StatusCode::ACCEPTED)
}

pub(crate) async fn load_owned_account(
    state: &AppState,
    org_id: &str,
    account_id: &str,
) -> Result<Account, AppError> {
    let account = state
        .store
        .get_account(account_id)
        .await?
        .filter(|a| a.org_id == org_id)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account not found")))?;
    Ok(account)
}
