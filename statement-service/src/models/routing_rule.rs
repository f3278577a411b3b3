use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Links an account to a destination. Many rules may target the same
/// account; every active rule yields one delivery per new statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    #[serde(rename = "_id")]
    pub id: String,
    pub org_id: String,
    pub account_id: String,
    pub destination_id: String,
    /// Overrides the destination's default folder when set.
    pub folder_override: Option<String>,
    /// Filename template with allow-listed placeholders, e.g.
    /// `{institution}-{accountLast4}-{periodEnd}.{fileType}`.
    pub filename_template: Option<String>,
    pub active: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl RoutingRule {
    pub fn new(
        org_id: String,
        account_id: String,
        destination_id: String,
        folder_override: Option<String>,
        filename_template: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            org_id,
            account_id,
            destination_id,
            folder_override,
            filename_template,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
