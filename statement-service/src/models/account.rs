use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Paused,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: String,
    pub org_id: String,
    pub connection_id: String,
    /// Stable id assigned by the upstream aggregator; upsert key during sync.
    pub upstream_account_id: String,
    pub name: String,
    /// Masked number, e.g. last four digits.
    pub mask: String,
    pub account_type: String,
    pub subtype: Option<String>,
    pub statements_supported: bool,
    pub status: AccountStatus,
    pub last_statement_check: Option<DateTime<Utc>>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        org_id: String,
        connection_id: String,
        upstream_account_id: String,
        name: String,
        mask: String,
        account_type: String,
        subtype: Option<String>,
        statements_supported: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            org_id,
            connection_id,
            upstream_account_id,
            name,
            mask,
            account_type,
            subtype,
            statements_supported,
            status: AccountStatus::Active,
            last_statement_check: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_detectable(&self) -> bool {
        self.statements_supported && self.status == AccountStatus::Active
    }
}
