//! Routing resolver: expands a new statement into delivery tasks.

use crate::models::{Delivery, RoutingRule, Statement};
use crate::services::store::StatementStore;
use service_core::error::AppError;
use std::sync::Arc;

/// Active routing rules for an account, in creation order. Pure read; the
/// resolver itself never mutates state.
pub async fn resolve_routes(
    store: &Arc<dyn StatementStore>,
    account_id: &str,
) -> Result<Vec<RoutingRule>, AppError> {
    store.active_rules_for_account(account_id).await
}

/// Create one pending delivery per resolved rule. Zero rules is not an
/// error: the statement stays detected but undelivered. Rows are committed
/// before the caller enqueues any delivery work, which is what keeps
/// detection ordered ahead of delivery for a period.
pub async fn fan_out(
    store: &Arc<dyn StatementStore>,
    statement: &Statement,
    rules: &[RoutingRule],
) -> Result<Vec<Delivery>, AppError> {
    let mut deliveries = Vec::with_capacity(rules.len());
    for rule in rules {
        let delivery = Delivery::new(
            statement.org_id.clone(),
            statement.id.clone(),
            rule.destination_id.clone(),
            rule.id.clone(),
        );
        store.insert_delivery(delivery.clone()).await?;
        deliveries.push(delivery);
    }

    if deliveries.is_empty() {
        tracing::debug!(
            statement_id = %statement.id,
            "No active routing rules; statement detected but undelivered"
        );
    }
    Ok(deliveries)
}
