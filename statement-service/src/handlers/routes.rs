use crate::dtos::{CreateRouteRequest, RouteResponse, UpdateRouteRequest};
use crate::middleware::OrgId;
use crate::models::RoutingRule;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

pub async fn list_routes(
    State(state): State<AppState>,
    org_id: OrgId,
) -> Result<impl IntoResponse, AppError> {
    let rules = state.store.list_routing_rules(&org_id.0).await?;
    Ok(Json(
        rules.into_iter().map(RouteResponse::from).collect::<Vec<_>>(),
    ))
}

pub async fn create_route(
    State(state): State<AppState>,
    org_id: OrgId,
    Json(request): Json<CreateRouteRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    // Both ends of the route must exist and belong to the caller's org.
    state
        .store
        .get_account(&request.account_id)
        .await?
        .filter(|a| a.org_id == org_id.0)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account not found")))?;
    state
        .store
        .get_destination(&request.destination_id)
        .await?
        .filter(|d| d.org_id == org_id.0)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Destination not found")))?;

    if let Some(template) = &request.filename_template {
        crate::workers::template::validate_template(template)?;
    }

    let rule = RoutingRule::new(
        org_id.0,
        request.account_id,
        request.destination_id,
        request.folder_override,
        request.filename_template,
    );
    state.store.insert_routing_rule(rule.clone()).await?;

    tracing::info!(rule_id = %rule.id, account_id = %rule.account_id, "Routing rule created");
    Ok((StatusCode::CREATED, Json(RouteResponse::from(rule))))
}

pub async fn update_route(
    State(state): State<AppState>,
    org_id: OrgId,
    Path(rule_id): Path<String>,
    Json(request): Json<UpdateRouteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let rule = state
        .store
        .get_routing_rule(&rule_id)
        .await?
        .filter(|r| r.org_id == org_id.0)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Routing rule not found")))?;

    if let Some(active) = request.active {
        state.store.set_routing_rule_active(&rule.id, active).await?;
    }

    let updated = state
        .store
        .get_routing_rule(&rule.id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Routing rule not found")))?;
    Ok(Json(RouteResponse::from(updated)))
}
