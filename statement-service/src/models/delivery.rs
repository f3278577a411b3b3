use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retry budget per delivery. After this many attempts the delivery is
/// terminally failed and only a manual retry resets it.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

/// Attempt tracking for one (statement, destination) pair produced by a
/// routing rule. The pending -> in_progress claim is the per-entity lease
/// that prevents concurrent double-sends; `request_id` lets a webhook
/// receiver dedupe even when a response is lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    #[serde(rename = "_id")]
    pub id: String,
    pub org_id: String,
    pub statement_id: String,
    pub destination_id: String,
    pub routing_rule_id: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Idempotency token, fixed at creation and stable across retries.
    pub request_id: String,
    /// Earliest time the next attempt may be claimed. Stored as a native
    /// BSON datetime so the scheduler's due query can compare it server-side.
    #[serde(with = "bson_datetime_option")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Storage path and byte size, captured on cloud-storage success.
    pub storage_path: Option<String>,
    pub storage_size: Option<u64>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub fn new(
        org_id: String,
        statement_id: String,
        destination_id: String,
        routing_rule_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            org_id,
            statement_id,
            destination_id,
            routing_rule_id,
            status: DeliveryStatus::Pending,
            attempts: 0,
            error_message: None,
            delivered_at: None,
            request_id: Uuid::new_v4().to_string(),
            next_attempt_at: Some(now),
            storage_path: None,
            storage_size: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, DeliveryStatus::Succeeded | DeliveryStatus::Failed)
    }

    /// Whether the scheduler should enqueue this delivery now.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == DeliveryStatus::Pending
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

mod bson_datetime_option {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.map(bson::DateTime::from_chrono).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<bson::DateTime>::deserialize(deserializer)?.map(|dt| dt.to_chrono()))
    }
}
