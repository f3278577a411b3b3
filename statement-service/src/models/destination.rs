use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    GoogleDrive,
    Dropbox,
    Onedrive,
    Webhook,
}

impl DestinationKind {
    pub fn is_cloud_storage(&self) -> bool {
        !matches!(self, DestinationKind::Webhook)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DestinationStatus {
    Active,
    Inactive,
    Error,
}

/// A configured delivery target. `config` is an opaque key-value map:
/// `folder_path` / `url` / `base_url` plus `access_token_enc` or
/// `secret_enc` holding vault ciphertext. Secret plaintext is never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    #[serde(rename = "_id")]
    pub id: String,
    pub org_id: String,
    pub kind: DestinationKind,
    pub name: String,
    pub config: HashMap<String, String>,
    pub status: DestinationStatus,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Destination {
    pub fn new(
        org_id: String,
        kind: DestinationKind,
        name: String,
        config: HashMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            org_id,
            kind,
            name,
            config,
            status: DestinationStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }
}
