use crate::dtos::{
    AccountResponse, ConnectionResponse, ExchangePublicTokenRequest, ExchangeResponse,
    LinkTokenResponse,
};
use crate::middleware::OrgId;
use crate::models::Connection;
use crate::startup::AppState;
use crate::workers::{backfill, DetectionTask};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{Datelike, NaiveDate, Utc};
use service_core::error::AppError;
use validator::Validate;

pub async fn create_link_token(
    State(state): State<AppState>,
    org_id: OrgId,
) -> Result<impl IntoResponse, AppError> {
    let token = state.aggregator.create_link_token(&org_id.0).await?;
    Ok(Json(LinkTokenResponse {
        link_token: token.link_token,
        expiration: token.expiration,
    }))
}

/// Complete a link: exchange the public token, store the access token as
/// vault ciphertext, run the initial sync inline so the response carries the
/// discovered accounts, then queue statement checks (and an optional
/// backfill over the trailing months).
pub async fn exchange_public_token(
    State(state): State<AppState>,
    org_id: OrgId,
    Json(request): Json<ExchangePublicTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let exchange = state
        .aggregator
        .exchange_public_token(&request.public_token)
        .await?;
    let item = state.aggregator.item_status(&exchange.access_token).await?;

    let token_enc = state.vault.encrypt(&exchange.access_token)?;
    let connection = Connection::new(
        org_id.0.clone(),
        exchange.item_id,
        item.institution_id,
        item.institution_name,
        token_enc,
    );
    state.store.insert_connection(connection.clone()).await?;

    tracing::info!(
        connection_id = %connection.id,
        institution = %connection.institution_name,
        "Bank connection linked"
    );

    state.sync_engine.sync_connection(&connection.id).await?;
    let accounts = state
        .store
        .list_accounts_for_connection(&connection.id)
        .await?;

    for account in accounts.iter().filter(|a| a.is_detectable()) {
        state
            .handles
            .detect_tx
            .send(DetectionTask::poll(account.id.clone()))
            .await
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("detection queue closed")))?;
    }

    // Every statement-capable account gets its own history job.
    let mut backfill_jobs = Vec::new();
    if let Some(months) = request.backfill_months {
        let today = Utc::now().date_naive();
        for account in accounts.iter().filter(|a| a.is_detectable()) {
            let (job, tasks) = backfill::start_backfill(
                &state.store,
                &org_id.0,
                &account.id,
                months_ago(today, months),
                today,
            )
            .await?;
            for task in tasks {
                state.handles.detect_tx.send(task).await.map_err(|_| {
                    AppError::InternalError(anyhow::anyhow!("detection queue closed"))
                })?;
            }
            backfill_jobs.push(job.into());
        }
    }

    let connection = state
        .store
        .get_connection(&connection.id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Connection not found")))?;

    Ok((
        StatusCode::CREATED,
        Json(ExchangeResponse {
            connection: ConnectionResponse::from(connection),
            accounts: accounts.into_iter().map(AccountResponse::from).collect(),
            backfill_jobs,
        }),
    ))
}

/// `today` minus `months` calendar months, clamping to the first of the
/// month when the day does not exist.
fn months_ago(today: NaiveDate, months: u32) -> NaiveDate {
    let total = today.year() * 12 + today.month() as i32 - 1 - months as i32;
    let year = total.div_euclid(12);
    let month = (total.rem_euclid(12) + 1) as u32;
    NaiveDate::from_ymd_opt(year, month, today.day())
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, month, 1).expect("valid first of month"))
}
