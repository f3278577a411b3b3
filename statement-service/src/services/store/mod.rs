//! Persistence seam for the pipeline.
//!
//! `StatementStore` is implemented by [`MongoStore`] in production and by
//! [`MemoryStore`] for tests and local runs without a database, following
//! the same trait-per-backend pattern as the storage layer elsewhere in the
//! workspace.

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use crate::models::{
    Account, AccountStatus, BackfillJob, BackfillStatus, Connection, ConnectionStatus, Delivery,
    Destination, DestinationStatus, RoutingRule, Statement,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;

#[async_trait]
pub trait StatementStore: Send + Sync {
    // Connections
    async fn insert_connection(&self, connection: Connection) -> Result<(), AppError>;
    async fn get_connection(&self, id: &str) -> Result<Option<Connection>, AppError>;
    /// Lookup by upstream item id, used to route inbound aggregator webhooks.
    async fn get_connection_by_item(&self, item_id: &str)
        -> Result<Option<Connection>, AppError>;
    async fn list_connections(&self, org_id: &str) -> Result<Vec<Connection>, AppError>;
    /// Connections eligible for scheduled sync (active or errored, never
    /// revoked or awaiting relink).
    async fn list_syncable_connections(&self) -> Result<Vec<Connection>, AppError>;
    async fn update_connection_status(
        &self,
        id: &str,
        status: ConnectionStatus,
        error_message: Option<String>,
    ) -> Result<(), AppError>;
    async fn mark_connection_synced(&self, id: &str, at: DateTime<Utc>) -> Result<(), AppError>;
    async fn delete_connection(&self, id: &str) -> Result<(), AppError>;

    // Accounts
    /// Upsert by (connection_id, upstream_account_id); inserts a new account
    /// or refreshes the mutable fields of an existing one. Returns the
    /// stored account.
    async fn upsert_account(&self, account: Account) -> Result<Account, AppError>;
    async fn get_account(&self, id: &str) -> Result<Option<Account>, AppError>;
    async fn list_accounts(&self, org_id: &str) -> Result<Vec<Account>, AppError>;
    async fn list_accounts_for_connection(
        &self,
        connection_id: &str,
    ) -> Result<Vec<Account>, AppError>;
    async fn update_account_status(&self, id: &str, status: AccountStatus)
        -> Result<(), AppError>;
    async fn mark_statement_check(&self, id: &str, at: DateTime<Utc>) -> Result<(), AppError>;

    // Statements
    /// Latest version row for a period, compared strictly by period
    /// boundaries.
    async fn latest_statement_for_period(
        &self,
        account_id: &str,
        period_start: chrono::NaiveDate,
        period_end: chrono::NaiveDate,
    ) -> Result<Option<Statement>, AppError>;
    async fn insert_statement(&self, statement: Statement) -> Result<(), AppError>;
    async fn get_statement(&self, id: &str) -> Result<Option<Statement>, AppError>;
    async fn list_statements(&self, account_id: &str) -> Result<Vec<Statement>, AppError>;

    // Destinations
    async fn insert_destination(&self, destination: Destination) -> Result<(), AppError>;
    async fn get_destination(&self, id: &str) -> Result<Option<Destination>, AppError>;
    async fn list_destinations(&self, org_id: &str) -> Result<Vec<Destination>, AppError>;
    async fn update_destination_status(
        &self,
        id: &str,
        status: DestinationStatus,
    ) -> Result<(), AppError>;

    // Routing rules
    async fn insert_routing_rule(&self, rule: RoutingRule) -> Result<(), AppError>;
    async fn get_routing_rule(&self, id: &str) -> Result<Option<RoutingRule>, AppError>;
    async fn list_routing_rules(&self, org_id: &str) -> Result<Vec<RoutingRule>, AppError>;
    /// Active rules for an account; the routing resolver's only read.
    async fn active_rules_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<RoutingRule>, AppError>;
    async fn set_routing_rule_active(&self, id: &str, active: bool) -> Result<(), AppError>;

    // Deliveries
    async fn insert_delivery(&self, delivery: Delivery) -> Result<(), AppError>;
    async fn get_delivery(&self, id: &str) -> Result<Option<Delivery>, AppError>;
    async fn list_deliveries_for_statement(
        &self,
        statement_id: &str,
    ) -> Result<Vec<Delivery>, AppError>;
    /// The lease claim: a conditional pending -> in_progress transition that
    /// also increments `attempts`. Returns `None` when the row is already
    /// claimed, terminal, or not yet due; exactly one concurrent caller wins.
    async fn claim_delivery(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>, AppError>;
    async fn complete_delivery(
        &self,
        id: &str,
        delivered_at: DateTime<Utc>,
        storage_path: Option<String>,
        storage_size: Option<u64>,
    ) -> Result<(), AppError>;
    /// Record a failed attempt. `next_attempt_at = Some(..)` releases the
    /// lease back to pending for a later retry; `None` marks the delivery
    /// terminally failed.
    async fn fail_delivery(
        &self,
        id: &str,
        error_message: String,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError>;
    /// Manual resync of a terminally failed delivery: resets the attempt
    /// counter and requeues it. Fails with `Conflict` unless the row is in
    /// `failed`.
    async fn reset_delivery(&self, id: &str) -> Result<Delivery, AppError>;
    async fn due_deliveries(&self, now: DateTime<Utc>, limit: usize)
        -> Result<Vec<Delivery>, AppError>;

    // Backfill jobs
    async fn insert_backfill_job(&self, job: BackfillJob) -> Result<(), AppError>;
    async fn get_backfill_job(&self, id: &str) -> Result<Option<BackfillJob>, AppError>;
    async fn update_backfill_status(
        &self,
        id: &str,
        status: BackfillStatus,
        error_message: Option<String>,
    ) -> Result<(), AppError>;
    /// Record one finished month task and return the updated job so the
    /// caller can roll the aggregate status forward.
    async fn record_backfill_month(&self, id: &str, ok: bool) -> Result<BackfillJob, AppError>;

    // Notification preferences (opaque blob; templating out of scope)
    async fn put_notification_prefs(
        &self,
        org_id: &str,
        account_id: &str,
        prefs: serde_json::Value,
    ) -> Result<(), AppError>;
}
