use crate::dtos::StatementResponse;
use crate::handlers::accounts::load_owned_account;
use crate::middleware::OrgId;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

/// Detected statements for an account, newest period first, each with its
/// delivery attempts.
pub async fn list_statements(
    State(state): State<AppState>,
    org_id: OrgId,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let account = load_owned_account(&state, &org_id.0, &account_id).await?;

    let statements = state.store.list_statements(&account.id).await?;
    let mut responses = Vec::with_capacity(statements.len());
    for statement in statements {
        let deliveries = state
            .store
            .list_deliveries_for_statement(&statement.id)
            .await?;
        responses.push(StatementResponse::from_parts(statement, deliveries));
    }

    Ok(Json(responses))
}
