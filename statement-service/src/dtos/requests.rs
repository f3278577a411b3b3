use crate::models::DestinationKind;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct ExchangePublicTokenRequest {
    #[validate(length(min = 1))]
    pub public_token: String,
    /// When set, start a backfill over the trailing N months right after
    /// linking.
    #[validate(range(min = 1, max = 12))]
    pub backfill_months: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BackfillRequest {
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
}

/// `config` carries destination settings plus plaintext secrets under
/// `access_token` (cloud storage) or `secret` (webhook). The handler
/// encrypts those into `*_enc` entries; plaintext is never stored.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateDestinationRequest {
    pub kind: DestinationKind,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    pub config: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRouteRequest {
    #[validate(length(min = 1))]
    pub account_id: String,
    #[validate(length(min = 1))]
    pub destination_id: String,
    pub folder_override: Option<String>,
    pub filename_template: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRouteRequest {
    pub active: Option<bool>,
}
