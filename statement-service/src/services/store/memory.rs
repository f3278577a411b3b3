//! In-memory store used by the test harness and `STORE_BACKEND=memory` runs.
//!
//! A single async mutex guards all tables, which makes the conditional
//! delivery claim naturally atomic.

use super::StatementStore;
use crate::models::{
    Account, AccountStatus, BackfillJob, BackfillStatus, Connection, ConnectionStatus, Delivery,
    DeliveryStatus, Destination, DestinationStatus, RoutingRule, Statement,
    MAX_DELIVERY_ATTEMPTS,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    connections: HashMap<String, Connection>,
    accounts: HashMap<String, Account>,
    statements: HashMap<String, Statement>,
    destinations: HashMap<String, Destination>,
    routing_rules: HashMap<String, RoutingRule>,
    deliveries: HashMap<String, Delivery>,
    backfill_jobs: HashMap<String, BackfillJob>,
    notification_prefs: HashMap<String, serde_json::Value>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(entity: &str, id: &str) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} {} not found", entity, id))
}

#[async_trait]
impl StatementStore for MemoryStore {
    async fn insert_connection(&self, connection: Connection) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        t.connections.insert(connection.id.clone(), connection);
        Ok(())
    }

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>, AppError> {
        Ok(self.tables.lock().await.connections.get(id).cloned())
    }

    async fn get_connection_by_item(
        &self,
        item_id: &str,
    ) -> Result<Option<Connection>, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .connections
            .values()
            .find(|c| c.item_id == item_id)
            .cloned())
    }

    async fn list_connections(&self, org_id: &str) -> Result<Vec<Connection>, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .connections
            .values()
            .filter(|c| c.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn list_syncable_connections(&self) -> Result<Vec<Connection>, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .connections
            .values()
            .filter(|c| c.is_syncable())
            .cloned()
            .collect())
    }

    async fn update_connection_status(
        &self,
        id: &str,
        status: ConnectionStatus,
        error_message: Option<String>,
    ) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        let conn = t
            .connections
            .get_mut(id)
            .ok_or_else(|| not_found("connection", id))?;
        conn.status = status;
        conn.error_message = error_message;
        conn.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_connection_synced(&self, id: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        let conn = t
            .connections
            .get_mut(id)
            .ok_or_else(|| not_found("connection", id))?;
        conn.last_sync = Some(at);
        conn.updated_at = at;
        Ok(())
    }

    async fn delete_connection(&self, id: &str) -> Result<(), AppError> {
        self.tables.lock().await.connections.remove(id);
        Ok(())
    }

    async fn upsert_account(&self, account: Account) -> Result<Account, AppError> {
        let mut t = self.tables.lock().await;
        let existing_id = t
            .accounts
            .values()
            .find(|a| {
                a.connection_id == account.connection_id
                    && a.upstream_account_id == account.upstream_account_id
            })
            .map(|a| a.id.clone());

        match existing_id {
            Some(id) => {
                let stored = t.accounts.get_mut(&id).expect("looked up above");
                stored.name = account.name;
                stored.mask = account.mask;
                stored.account_type = account.account_type;
                stored.subtype = account.subtype;
                stored.statements_supported = account.statements_supported;
                stored.updated_at = Utc::now();
                Ok(stored.clone())
            }
            None => {
                t.accounts.insert(account.id.clone(), account.clone());
                Ok(account)
            }
        }
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>, AppError> {
        Ok(self.tables.lock().await.accounts.get(id).cloned())
    }

    async fn list_accounts(&self, org_id: &str) -> Result<Vec<Account>, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .accounts
            .values()
            .filter(|a| a.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn list_accounts_for_connection(
        &self,
        connection_id: &str,
    ) -> Result<Vec<Account>, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .accounts
            .values()
            .filter(|a| a.connection_id == connection_id)
            .cloned()
            .collect())
    }

    async fn update_account_status(
        &self,
        id: &str,
        status: AccountStatus,
    ) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        let account = t.accounts.get_mut(id).ok_or_else(|| not_found("account", id))?;
        account.status = status;
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_statement_check(&self, id: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        let account = t.accounts.get_mut(id).ok_or_else(|| not_found("account", id))?;
        account.last_statement_check = Some(at);
        account.updated_at = at;
        Ok(())
    }

    async fn latest_statement_for_period(
        &self,
        account_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Option<Statement>, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .statements
            .values()
            .filter(|s| {
                s.account_id == account_id
                    && s.period_start == period_start
                    && s.period_end == period_end
            })
            .max_by_key(|s| s.version)
            .cloned())
    }

    async fn insert_statement(&self, statement: Statement) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        let duplicate = t.statements.values().any(|s| {
            s.account_id == statement.account_id
                && s.period_start == statement.period_start
                && s.period_end == statement.period_end
                && s.version == statement.version
        });
        if duplicate {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "statement version {} already exists for period {}..{}",
                statement.version,
                statement.period_start,
                statement.period_end
            )));
        }
        t.statements.insert(statement.id.clone(), statement);
        Ok(())
    }

    async fn get_statement(&self, id: &str) -> Result<Option<Statement>, AppError> {
        Ok(self.tables.lock().await.statements.get(id).cloned())
    }

    async fn list_statements(&self, account_id: &str) -> Result<Vec<Statement>, AppError> {
        let mut statements: Vec<Statement> = self
            .tables
            .lock()
            .await
            .statements
            .values()
            .filter(|s| s.account_id == account_id)
            .cloned()
            .collect();
        statements.sort_by(|a, b| {
            (b.period_end, b.version).cmp(&(a.period_end, a.version))
        });
        Ok(statements)
    }

    async fn insert_destination(&self, destination: Destination) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        t.destinations.insert(destination.id.clone(), destination);
        Ok(())
    }

    async fn get_destination(&self, id: &str) -> Result<Option<Destination>, AppError> {
        Ok(self.tables.lock().await.destinations.get(id).cloned())
    }

    async fn list_destinations(&self, org_id: &str) -> Result<Vec<Destination>, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .destinations
            .values()
            .filter(|d| d.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn update_destination_status(
        &self,
        id: &str,
        status: DestinationStatus,
    ) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        let dest = t
            .destinations
            .get_mut(id)
            .ok_or_else(|| not_found("destination", id))?;
        dest.status = status;
        dest.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_routing_rule(&self, rule: RoutingRule) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        t.routing_rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    async fn get_routing_rule(&self, id: &str) -> Result<Option<RoutingRule>, AppError> {
        Ok(self.tables.lock().await.routing_rules.get(id).cloned())
    }

    async fn list_routing_rules(&self, org_id: &str) -> Result<Vec<RoutingRule>, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .routing_rules
            .values()
            .filter(|r| r.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn active_rules_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<RoutingRule>, AppError> {
        let mut rules: Vec<RoutingRule> = self
            .tables
            .lock()
            .await
            .routing_rules
            .values()
            .filter(|r| r.account_id == account_id && r.active)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rules)
    }

    async fn set_routing_rule_active(&self, id: &str, active: bool) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        let rule = t
            .routing_rules
            .get_mut(id)
            .ok_or_else(|| not_found("routing rule", id))?;
        rule.active = active;
        rule.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_delivery(&self, delivery: Delivery) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        t.deliveries.insert(delivery.id.clone(), delivery);
        Ok(())
    }

    async fn get_delivery(&self, id: &str) -> Result<Option<Delivery>, AppError> {
        Ok(self.tables.lock().await.deliveries.get(id).cloned())
    }

    async fn list_deliveries_for_statement(
        &self,
        statement_id: &str,
    ) -> Result<Vec<Delivery>, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .deliveries
            .values()
            .filter(|d| d.statement_id == statement_id)
            .cloned()
            .collect())
    }

    async fn claim_delivery(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>, AppError> {
        let mut t = self.tables.lock().await;
        let delivery = t.deliveries.get_mut(id).ok_or_else(|| not_found("delivery", id))?;

        if !delivery.is_due(now) {
            return Ok(None);
        }

        delivery.status = DeliveryStatus::InProgress;
        delivery.attempts += 1;
        delivery.next_attempt_at = None;
        delivery.updated_at = now;
        Ok(Some(delivery.clone()))
    }

    async fn complete_delivery(
        &self,
        id: &str,
        delivered_at: DateTime<Utc>,
        storage_path: Option<String>,
        storage_size: Option<u64>,
    ) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        let delivery = t.deliveries.get_mut(id).ok_or_else(|| not_found("delivery", id))?;
        delivery.status = DeliveryStatus::Succeeded;
        delivery.delivered_at = Some(delivered_at);
        delivery.error_message = None;
        delivery.storage_path = storage_path;
        delivery.storage_size = storage_size;
        delivery.updated_at = delivered_at;
        Ok(())
    }

    async fn fail_delivery(
        &self,
        id: &str,
        error_message: String,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        let delivery = t.deliveries.get_mut(id).ok_or_else(|| not_found("delivery", id))?;
        delivery.error_message = Some(error_message);
        delivery.updated_at = Utc::now();
        match next_attempt_at {
            Some(at) => {
                delivery.status = DeliveryStatus::Pending;
                delivery.next_attempt_at = Some(at);
            }
            None => {
                delivery.status = DeliveryStatus::Failed;
                delivery.next_attempt_at = None;
            }
        }
        Ok(())
    }

    async fn reset_delivery(&self, id: &str) -> Result<Delivery, AppError> {
        let mut t = self.tables.lock().await;
        let delivery = t.deliveries.get_mut(id).ok_or_else(|| not_found("delivery", id))?;
        if delivery.status != DeliveryStatus::Failed {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "delivery {} is not in failed state",
                id
            )));
        }
        debug_assert!(delivery.attempts <= MAX_DELIVERY_ATTEMPTS);
        delivery.status = DeliveryStatus::Pending;
        delivery.attempts = 0;
        delivery.error_message = None;
        delivery.next_attempt_at = Some(Utc::now());
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }

    async fn due_deliveries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Delivery>, AppError> {
        let t = self.tables.lock().await;
        let mut due: Vec<Delivery> = t
            .deliveries
            .values()
            .filter(|d| d.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_attempt_at.cmp(&b.next_attempt_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn insert_backfill_job(&self, job: BackfillJob) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        t.backfill_jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_backfill_job(&self, id: &str) -> Result<Option<BackfillJob>, AppError> {
        Ok(self.tables.lock().await.backfill_jobs.get(id).cloned())
    }

    async fn update_backfill_status(
        &self,
        id: &str,
        status: BackfillStatus,
        error_message: Option<String>,
    ) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        let job = t
            .backfill_jobs
            .get_mut(id)
            .ok_or_else(|| not_found("backfill job", id))?;
        job.status = status;
        job.error_message = error_message;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn record_backfill_month(&self, id: &str, ok: bool) -> Result<BackfillJob, AppError> {
        let mut t = self.tables.lock().await;
        let job = t
            .backfill_jobs
            .get_mut(id)
            .ok_or_else(|| not_found("backfill job", id))?;
        if ok {
            job.months_done += 1;
        } else {
            job.months_failed += 1;
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn put_notification_prefs(
        &self,
        org_id: &str,
        account_id: &str,
        prefs: serde_json::Value,
    ) -> Result<(), AppError> {
        let mut t = self.tables.lock().await;
        t.notification_prefs
            .insert(format!("{}:{}", org_id, account_id), prefs);
        Ok(())
    }
}
