use crate::models::{
    Account, AccountStatus, BackfillJob, BackfillStatus, Connection, ConnectionStatus, Delivery,
    DeliveryStatus, Destination, DestinationKind, DestinationStatus, RoutingRule, Statement,
    StatementFileType,
};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub id: String,
    pub institution_id: String,
    pub institution_name: String,
    pub status: ConnectionStatus,
    pub last_sync: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
}

impl From<Connection> for ConnectionResponse {
    fn from(c: Connection) -> Self {
        Self {
            id: c.id,
            institution_id: c.institution_id,
            institution_name: c.institution_name,
            status: c.status,
            last_sync: c.last_sync.map(|t| t.to_rfc3339()),
            error_message: c.error_message,
            created_at: c.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: String,
    pub connection_id: String,
    pub name: String,
    pub mask: String,
    pub account_type: String,
    pub subtype: Option<String>,
    pub statements_supported: bool,
    pub status: AccountStatus,
    pub last_statement_check: Option<String>,
}

impl From<Account> for AccountResponse {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            connection_id: a.connection_id,
            name: a.name,
            mask: a.mask,
            account_type: a.account_type,
            subtype: a.subtype,
            statements_supported: a.statements_supported,
            status: a.status,
            last_statement_check: a.last_statement_check.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatementResponse {
    pub id: String,
    pub account_id: String,
    pub period_start: String,
    pub period_end: String,
    pub statement_date: String,
    pub file_type: StatementFileType,
    pub version: u32,
    pub checksum: String,
    pub backfill_job_id: Option<String>,
    pub deliveries: Vec<DeliveryResponse>,
}

impl StatementResponse {
    pub fn from_parts(statement: Statement, deliveries: Vec<Delivery>) -> Self {
        Self {
            id: statement.id,
            account_id: statement.account_id,
            period_start: statement.period_start.to_string(),
            period_end: statement.period_end.to_string(),
            statement_date: statement.statement_date.to_string(),
            file_type: statement.file_type,
            version: statement.version,
            checksum: statement.checksum,
            backfill_job_id: statement.backfill_job_id,
            deliveries: deliveries.into_iter().map(DeliveryResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub id: String,
    pub statement_id: String,
    pub destination_id: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub delivered_at: Option<String>,
    pub next_attempt_at: Option<String>,
    pub storage_path: Option<String>,
}

impl From<Delivery> for DeliveryResponse {
    fn from(d: Delivery) -> Self {
        Self {
            id: d.id,
            statement_id: d.statement_id,
            destination_id: d.destination_id,
            status: d.status,
            attempts: d.attempts,
            error_message: d.error_message,
            delivered_at: d.delivered_at.map(|t| t.to_rfc3339()),
            next_attempt_at: d.next_attempt_at.map(|t| t.to_rfc3339()),
            storage_path: d.storage_path,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DestinationResponse {
    pub id: String,
    pub kind: DestinationKind,
    pub name: String,
    /// Settings with every encrypted entry dropped; ciphertext never leaves
    /// the service.
    pub config: HashMap<String, String>,
    pub status: DestinationStatus,
    pub created_at: String,
}

impl From<Destination> for DestinationResponse {
    fn from(d: Destination) -> Self {
        let config = d
            .config
            .into_iter()
            .filter(|(k, _)| !k.ends_with("_enc"))
            .collect();
        Self {
            id: d.id,
            kind: d.kind,
            name: d.name,
            config,
            status: d.status,
            created_at: d.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub id: String,
    pub account_id: String,
    pub destination_id: String,
    pub folder_override: Option<String>,
    pub filename_template: Option<String>,
    pub active: bool,
}

impl From<RoutingRule> for RouteResponse {
    fn from(r: RoutingRule) -> Self {
        Self {
            id: r.id,
            account_id: r.account_id,
            destination_id: r.destination_id,
            folder_override: r.folder_override,
            filename_template: r.filename_template,
            active: r.active,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BackfillJobResponse {
    pub id: String,
    pub account_id: String,
    pub range_start: String,
    pub range_end: String,
    pub status: BackfillStatus,
    pub months_total: u32,
    pub months_done: u32,
    pub months_failed: u32,
    pub error_message: Option<String>,
}

impl From<BackfillJob> for BackfillJobResponse {
    fn from(j: BackfillJob) -> Self {
        Self {
            id: j.id,
            account_id: j.account_id,
            range_start: j.range_start.to_string(),
            range_end: j.range_end.to_string(),
            status: j.status,
            months_total: j.months_total,
            months_done: j.months_done,
            months_failed: j.months_failed,
            error_message: j.error_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LinkTokenResponse {
    pub link_token: String,
    pub expiration: String,
}

#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    pub connection: ConnectionResponse,
    pub accounts: Vec<AccountResponse>,
    /// One job per statement-capable account when `backfill_months` was
    /// requested; empty otherwise.
    pub backfill_jobs: Vec<BackfillJobResponse>,
}
