use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    ReauthRequired,
    Error,
    Revoked,
}

/// One linked bank item. The access token is held only as vault ciphertext;
/// plaintext never leaves the vault boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    #[serde(rename = "_id")]
    pub id: String,
    pub org_id: String,
    /// Upstream item id; inbound aggregator webhooks are keyed by it.
    pub item_id: String,
    pub institution_id: String,
    pub institution_name: String,
    pub status: ConnectionStatus,
    pub access_token_enc: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        org_id: String,
        item_id: String,
        institution_id: String,
        institution_name: String,
        access_token_enc: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            org_id,
            item_id,
            institution_id,
            institution_name,
            status: ConnectionStatus::Active,
            access_token_enc,
            last_sync: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Revoked connections are never synced again; reauth-required ones wait
    /// for the user to relink.
    pub fn is_syncable(&self) -> bool {
        matches!(self.status, ConnectionStatus::Active | ConnectionStatus::Error)
    }
}
