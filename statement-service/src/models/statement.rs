use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatementFileType {
    Pdf,
    Csv,
}

impl StatementFileType {
    pub fn extension(&self) -> &'static str {
        match self {
            StatementFileType::Pdf => "pdf",
            StatementFileType::Csv => "csv",
        }
    }
}

/// One detected statement version. Immutable once created; a content
/// correction for the same period lands as a new row with version + 1.
/// (account_id, period_start, period_end, version) is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "_id")]
    pub id: String,
    pub org_id: String,
    pub account_id: String,
    /// Id the aggregator uses for this statement, kept for downloads.
    pub upstream_statement_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub statement_date: NaiveDate,
    pub file_type: StatementFileType,
    /// Hex SHA-256 over the upstream content descriptor. Never changes for a
    /// fixed version.
    pub checksum: String,
    pub version: u32,
    /// Backfill job that surfaced this statement, when applicable.
    pub backfill_job_id: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Statement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        org_id: String,
        account_id: String,
        upstream_statement_id: String,
        period_start: NaiveDate,
        period_end: NaiveDate,
        statement_date: NaiveDate,
        file_type: StatementFileType,
        checksum: String,
        version: u32,
        backfill_job_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            org_id,
            account_id,
            upstream_statement_id,
            period_start,
            period_end,
            statement_date,
            file_type,
            checksum,
            version,
            backfill_job_id,
            created_at: Utc::now(),
        }
    }
}
