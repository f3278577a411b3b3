use crate::handlers::accounts::load_owned_account;
use crate::middleware::OrgId;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

/// Store the caller's notification preferences for an account as an opaque
/// document; interpretation is the notifier's concern.
pub async fn put_preferences(
    State(state): State<AppState>,
    org_id: OrgId,
    Path(account_id): Path<String>,
    Json(prefs): Json<serde_json::Value>,
) -> Result<impl IntoResponse, AppError> {
    let account = load_owned_account(&state, &org_id.0, &account_id).await?;
    state
        .store
        .put_notification_prefs(&org_id.0, &account.id, prefs)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
