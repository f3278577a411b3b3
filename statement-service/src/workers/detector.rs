//! Statement detector: the single source of truth for "is this a new
//! statement".
//!
//! Diffs the aggregator's statement list against known rows by period
//! boundaries and content checksum. Identical checksums never produce a new
//! version; a changed checksum for a known period lands as version + 1.

use crate::models::{BackfillStatus, Delivery, Statement, StatementFileType};
use crate::services::aggregator::{Aggregator, UpstreamStatement};
use crate::services::store::StatementStore;
use crate::services::vault::Vault;
use crate::workers::router;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use service_core::error::AppError;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// One unit of detection work: a regular poll or one backfill month.
#[derive(Debug, Clone)]
pub struct DetectionTask {
    pub account_id: String,
    /// Explicit period window; `None` means "since the last check".
    pub window: Option<(NaiveDate, NaiveDate)>,
    pub backfill_job_id: Option<String>,
}

impl DetectionTask {
    pub fn poll(account_id: String) -> Self {
        Self {
            account_id,
            window: None,
            backfill_job_id: None,
        }
    }

    pub fn backfill(account_id: String, window: (NaiveDate, NaiveDate), job_id: String) -> Self {
        Self {
            account_id,
            window: Some(window),
            backfill_job_id: Some(job_id),
        }
    }
}

/// Why a detection run did no work. The two cases are accounted for
/// differently during a backfill: a terminal job drops the month entirely,
/// an ineligible target counts the month as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSkip {
    /// The owning backfill job is already cancelled, completed or failed.
    JobTerminal,
    /// The account is paused or its connection is not syncable.
    Ineligible,
}

#[derive(Debug, Default)]
pub struct DetectionOutcome {
    pub new_statements: Vec<Statement>,
    pub deliveries: Vec<Delivery>,
    pub skipped: Option<DetectionSkip>,
}

pub struct StatementDetector {
    store: Arc<dyn StatementStore>,
    aggregator: Arc<dyn Aggregator>,
    vault: Arc<Vault>,
    /// Window for accounts that have never been checked, in days.
    initial_lookback_days: i64,
}

impl StatementDetector {
    pub fn new(
        store: Arc<dyn StatementStore>,
        aggregator: Arc<dyn Aggregator>,
        vault: Arc<Vault>,
        initial_lookback_days: i64,
    ) -> Self {
        Self {
            store,
            aggregator,
            vault,
            initial_lookback_days,
        }
    }

    pub async fn detect(&self, task: &DetectionTask) -> Result<DetectionOutcome, AppError> {
        // Cancelled or finished backfill jobs abort before any upstream call;
        // months already processed are never rolled back.
        if let Some(job_id) = &task.backfill_job_id {
            let job = self.store.get_backfill_job(job_id).await?.ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("backfill job {} not found", job_id))
            })?;
            if job.is_terminal() {
                return Ok(DetectionOutcome {
                    skipped: Some(DetectionSkip::JobTerminal),
                    ..Default::default()
                });
            }
            if job.status == BackfillStatus::Pending {
                self.store
                    .update_backfill_status(job_id, BackfillStatus::InProgress, None)
                    .await?;
            }
        }

        let account = self
            .store
            .get_account(&task.account_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("account {} not found", task.account_id))
            })?;

        if !account.is_detectable() {
            return Ok(DetectionOutcome {
                skipped: Some(DetectionSkip::Ineligible),
                ..Default::default()
            });
        }

        let connection = self
            .store
            .get_connection(&account.connection_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "connection {} not found",
                    account.connection_id
                ))
            })?;

        // Statement checks stop for connections awaiting relink.
        if !connection.is_syncable() {
            return Ok(DetectionOutcome {
                skipped: Some(DetectionSkip::Ineligible),
                ..Default::default()
            });
        }

        let access_token = self.vault.decrypt(&connection.access_token_enc)?;

        let today = Utc::now().date_naive();
        let (start, end) = task.window.unwrap_or_else(|| {
            let start = account
                .last_statement_check
                .map(|at| at.date_naive())
                .unwrap_or_else(|| today - ChronoDuration::days(self.initial_lookback_days));
            (start, today)
        });

        let upstream = self
            .aggregator
            .list_statements(&access_token, &account.upstream_account_id, start, end)
            .await?;

        metrics::counter!("statement_detection_total").increment(1);

        let mut outcome = DetectionOutcome::default();
        for candidate in upstream {
            if let Some(statement) = self.ingest(&account.id, &account.org_id, &candidate, task).await? {
                let rules = router::resolve_routes(&self.store, &account.id).await?;
                let deliveries = router::fan_out(&self.store, &statement, &rules).await?;
                outcome.new_statements.push(statement);
                outcome.deliveries.extend(deliveries);
            }
        }

        // Backfill months never advance the regular polling cursor; a
        // historical window must not mask statements between the last real
        // check and now.
        if task.backfill_job_id.is_none() {
            self.store
                .mark_statement_check(&account.id, Utc::now())
                .await?;
        }

        metrics::counter!("statements_detected").increment(outcome.new_statements.len() as u64);
        Ok(outcome)
    }

    /// Version resolution for one upstream statement. Returns the inserted
    /// row, or `None` when the checksum already matches the latest version.
    async fn ingest(
        &self,
        account_id: &str,
        org_id: &str,
        candidate: &UpstreamStatement,
        task: &DetectionTask,
    ) -> Result<Option<Statement>, AppError> {
        let checksum = content_checksum(candidate);

        let latest = self
            .store
            .latest_statement_for_period(account_id, candidate.period_start, candidate.period_end)
            .await?;

        let version = match &latest {
            None => 1,
            Some(existing) if existing.checksum == checksum => return Ok(None),
            Some(existing) => existing.version + 1,
        };

        let file_type = match candidate.file_type.as_str() {
            "csv" => StatementFileType::Csv,
            _ => StatementFileType::Pdf,
        };

        let statement = Statement::new(
            org_id.to_string(),
            account_id.to_string(),
            candidate.statement_id.clone(),
            candidate.period_start,
            candidate.period_end,
            candidate.statement_date,
            file_type,
            checksum,
            version,
            task.backfill_job_id.clone(),
        );
        self.store.insert_statement(statement.clone()).await?;

        tracing::info!(
            account_id = %account_id,
            period_start = %candidate.period_start,
            period_end = %candidate.period_end,
            version = version,
            "New statement detected"
        );
        Ok(Some(statement))
    }
}

/// Checksum over the upstream content descriptor. Stable across identical
/// content, changes whenever the upstream corrects a statement.
pub fn content_checksum(statement: &UpstreamStatement) -> String {
    let mut hasher = Sha256::new();
    hasher.update(statement.statement_id.as_bytes());
    hasher.update(b"|");
    hasher.update(statement.byte_size.to_le_bytes());
    hasher.update(b"|");
    if let Some(hash) = &statement.content_hash {
        hasher.update(hash.as_bytes());
    }
    hasher.update(b"|");
    hasher.update(statement.period_start.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(statement.period_end.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
