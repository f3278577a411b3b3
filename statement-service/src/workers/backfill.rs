//! Backfill scheduler: expands a bounded historical range into per-month
//! detection tasks and aggregates their results onto the job.

use crate::models::{BackfillJob, BackfillStatus};
use crate::services::store::StatementStore;
use crate::workers::detector::{DetectionOutcome, DetectionSkip, DetectionTask};
use chrono::NaiveDate;
use service_core::error::AppError;
use std::sync::Arc;

/// Validate and persist a backfill job, returning it with the month tasks
/// to enqueue. Range violations surface synchronously as `InvalidRange`.
pub async fn start_backfill(
    store: &Arc<dyn StatementStore>,
    org_id: &str,
    account_id: &str,
    range_start: NaiveDate,
    range_end: NaiveDate,
) -> Result<(BackfillJob, Vec<DetectionTask>), AppError> {
    let account = store
        .get_account(account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("account {} not found", account_id)))?;
    if account.org_id != org_id {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "account {} not found",
            account_id
        )));
    }

    let job = BackfillJob::new(
        org_id.to_string(),
        account_id.to_string(),
        range_start,
        range_end,
    )?;
    store.insert_backfill_job(job.clone()).await?;

    let tasks = job
        .periods()
        .into_iter()
        .map(|window| DetectionTask::backfill(account_id.to_string(), window, job.id.clone()))
        .collect();

    metrics::counter!("backfill_jobs_started").increment(1);
    tracing::info!(
        job_id = %job.id,
        account_id = %account_id,
        months = job.months_total,
        "Backfill started"
    );
    Ok((job, tasks))
}

/// Account for one finished month task. A terminal job (cancelled mid-run)
/// records nothing; an ineligible target (paused account, reauth-required
/// connection) or a detection error counts the month as failed, so the job
/// still reaches a terminal status instead of stalling in progress.
pub async fn note_detection(
    store: &Arc<dyn StatementStore>,
    job_id: &str,
    result: &Result<DetectionOutcome, AppError>,
) -> Result<Option<BackfillJob>, AppError> {
    match result {
        Ok(outcome) if outcome.skipped == Some(DetectionSkip::JobTerminal) => Ok(None),
        Ok(outcome) => record_month(store, job_id, outcome.skipped.is_none())
            .await
            .map(Some),
        Err(_) => record_month(store, job_id, false).await.map(Some),
    }
}

/// Record one finished month and roll the aggregate job status forward once
/// every month is accounted for.
pub async fn record_month(
    store: &Arc<dyn StatementStore>,
    job_id: &str,
    ok: bool,
) -> Result<BackfillJob, AppError> {
    let job = store.record_backfill_month(job_id, ok).await?;
    if job.is_terminal() {
        // Cancelled mid-flight; completed months stay as they are.
        return Ok(job);
    }

    if job.months_done + job.months_failed >= job.months_total {
        let (status, error) = if job.months_failed == 0 {
            (BackfillStatus::Completed, None)
        } else {
            (
                BackfillStatus::Failed,
                Some(format!("{} of {} months failed", job.months_failed, job.months_total)),
            )
        };
        store.update_backfill_status(job_id, status, error).await?;
        return Ok(store
            .get_backfill_job(job_id)
            .await?
            .expect("job existed a moment ago"));
    }
    Ok(job)
}

/// Cancel a running job. In-flight month tasks observe the terminal status
/// before their next unit of work and abort; nothing already detected is
/// rolled back.
pub async fn cancel_backfill(
    store: &Arc<dyn StatementStore>,
    job_id: &str,
) -> Result<BackfillJob, AppError> {
    let job = store
        .get_backfill_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("backfill job {} not found", job_id)))?;
    if job.is_terminal() {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "backfill job {} is already {}",
            job_id,
            match job.status {
                BackfillStatus::Completed => "completed",
                BackfillStatus::Failed => "failed",
                BackfillStatus::Cancelled => "cancelled",
                _ => unreachable!("terminal status"),
            }
        )));
    }
    store
        .update_backfill_status(job_id, BackfillStatus::Cancelled, None)
        .await?;
    store
        .get_backfill_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("backfill job {} not found", job_id)))
}
