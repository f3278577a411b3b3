use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

/// Longest historical window a single backfill may cover.
pub const MAX_BACKFILL_MONTHS: u32 = 12;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Request to retrieve historical statements for an account over a bounded
/// date range, decomposed into one detection task per calendar month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillJob {
    #[serde(rename = "_id")]
    pub id: String,
    pub org_id: String,
    pub account_id: String,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub status: BackfillStatus,
    pub months_total: u32,
    pub months_done: u32,
    pub months_failed: u32,
    pub error_message: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl BackfillJob {
    pub fn new(
        org_id: String,
        account_id: String,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<Self, AppError> {
        validate_range(range_start, range_end, Utc::now().date_naive())?;
        let months = month_periods(range_start, range_end);
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            org_id,
            account_id,
            range_start,
            range_end,
            status: BackfillStatus::Pending,
            months_total: months.len() as u32,
            months_done: 0,
            months_failed: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            BackfillStatus::Completed | BackfillStatus::Failed | BackfillStatus::Cancelled
        )
    }

    /// Month windows this job expands into, oldest first.
    pub fn periods(&self) -> Vec<(NaiveDate, NaiveDate)> {
        month_periods(self.range_start, self.range_end)
    }
}

/// Enforced at the API boundary: start < end, end not in the future, span
/// at most [`MAX_BACKFILL_MONTHS`].
pub fn validate_range(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<(), AppError> {
    if start >= end {
        return Err(AppError::InvalidRange(format!(
            "range_start {} must be before range_end {}",
            start, end
        )));
    }
    if end > today {
        return Err(AppError::InvalidRange(format!(
            "range_end {} is in the future",
            end
        )));
    }
    if months_between(start, end) > MAX_BACKFILL_MONTHS {
        return Err(AppError::InvalidRange(format!(
            "range spans more than {} months",
            MAX_BACKFILL_MONTHS
        )));
    }
    Ok(())
}

/// Whole calendar months from `start` to `end`, rounding partial months up.
fn months_between(start: NaiveDate, end: NaiveDate) -> u32 {
    let whole = (end.year() - start.year()) * 12 + (end.month() as i32 - start.month() as i32);
    let whole = whole.max(0) as u32;
    if end.day() > start.day() {
        whole + 1
    } else {
        whole
    }
}

/// Expand [start, end] into per-calendar-month windows clamped to the range.
fn month_periods(start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut periods = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let month_start = cursor;
        let next_month = if cursor.month() == 12 {
            NaiveDate::from_ymd_opt(cursor.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(cursor.year(), cursor.month() + 1, 1)
        }
        .expect("valid first of month");
        let month_end = std::cmp::min(next_month.pred_opt().expect("valid day"), end);
        periods.push((month_start, month_end));
        cursor = next_month;
    }
    periods
}
