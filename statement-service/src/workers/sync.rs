//! Connection sync engine.
//!
//! Refreshes item status and the account list for one connection. Transient
//! upstream failures are retried in-call with exponential backoff; an
//! auth-expiry signal flips the connection to `reauth_required` and stops
//! statement checks until the user relinks.

use crate::models::{Account, Connection, ConnectionStatus};
use crate::services::aggregator::Aggregator;
use crate::services::notifier::{Notifier, PipelineEvent};
use crate::services::store::StatementStore;
use crate::services::vault::Vault;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::Utc;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Accounts refreshed; carries the number of upserted accounts.
    Synced(usize),
    /// Connection flagged for relink; statement checks stop.
    ReauthRequired,
    /// Connection is revoked or already awaiting relink.
    Skipped,
}

pub struct SyncEngine {
    store: Arc<dyn StatementStore>,
    aggregator: Arc<dyn Aggregator>,
    vault: Arc<Vault>,
    notifier: Arc<dyn Notifier>,
    /// Budget for in-call transient retries.
    retry_window: Duration,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn StatementStore>,
        aggregator: Arc<dyn Aggregator>,
        vault: Arc<Vault>,
        notifier: Arc<dyn Notifier>,
        retry_window: Duration,
    ) -> Self {
        Self {
            store,
            aggregator,
            vault,
            notifier,
            retry_window,
        }
    }

    pub async fn sync_connection(&self, connection_id: &str) -> Result<SyncOutcome, AppError> {
        let start = Instant::now();
        let connection = self
            .store
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("connection {} not found", connection_id))
            })?;

        if !connection.is_syncable() {
            tracing::debug!(connection_id = %connection_id, status = ?connection.status, "Skipping sync");
            return Ok(SyncOutcome::Skipped);
        }

        let access_token = self.vault.decrypt(&connection.access_token_enc)?;

        metrics::counter!("connection_sync_total").increment(1);

        match self.refresh(&connection, &access_token).await {
            Ok(count) => {
                self.store
                    .mark_connection_synced(connection_id, Utc::now())
                    .await?;
                if connection.status == ConnectionStatus::Error {
                    self.store
                        .update_connection_status(connection_id, ConnectionStatus::Active, None)
                        .await?;
                }
                metrics::counter!("connection_sync_success").increment(1);
                metrics::histogram!("connection_sync_duration")
                    .record(start.elapsed().as_secs_f64());
                tracing::info!(
                    connection_id = %connection_id,
                    accounts = count,
                    "Connection synced"
                );
                Ok(SyncOutcome::Synced(count))
            }
            Err(AppError::AuthExpired(code)) => {
                self.store
                    .update_connection_status(
                        connection_id,
                        ConnectionStatus::ReauthRequired,
                        Some(code.clone()),
                    )
                    .await?;
                self.notifier
                    .notify(PipelineEvent::ConnectionNeedsRelink {
                        connection_id: connection_id.to_string(),
                        institution_name: connection.institution_name.clone(),
                    })
                    .await;
                metrics::counter!("connection_sync_reauth").increment(1);
                Ok(SyncOutcome::ReauthRequired)
            }
            Err(e) if e.is_retryable() => {
                // Transient failure after the retry budget: leave status
                // untouched so the next scheduled sync tries again.
                metrics::counter!("connection_sync_failed", "kind" => "transient").increment(1);
                Err(e)
            }
            Err(e) => {
                self.store
                    .update_connection_status(
                        connection_id,
                        ConnectionStatus::Error,
                        Some(e.to_string()),
                    )
                    .await?;
                metrics::counter!("connection_sync_failed", "kind" => "permanent").increment(1);
                Err(e)
            }
        }
    }

    async fn refresh(&self, connection: &Connection, access_token: &str) -> Result<usize, AppError> {
        let item = self
            .with_transient_retry(|| self.aggregator.item_status(access_token))
            .await?;

        if let Some(code) = item.error_code {
            if code == "ITEM_LOGIN_REQUIRED" || code == "INVALID_ACCESS_TOKEN" {
                return Err(AppError::AuthExpired(code));
            }
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "item {} unhealthy: {}",
                item.item_id,
                code
            )));
        }

        let upstream_accounts = self
            .with_transient_retry(|| self.aggregator.list_accounts(access_token))
            .await?;

        let mut count = 0;
        for upstream in upstream_accounts {
            let account = Account::new(
                connection.org_id.clone(),
                connection.id.clone(),
                upstream.account_id,
                upstream.name,
                upstream.mask,
                upstream.account_type,
                upstream.subtype,
                upstream.statements_supported,
            );
            self.store.upsert_account(account).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Retry transient failures with exponential backoff; everything else is
    /// permanent and surfaces immediately.
    async fn with_transient_retry<T, F, Fut>(&self, op: F) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, AppError>>,
    {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.retry_window),
            ..Default::default()
        };
        retry(policy, || async {
            op().await.map_err(|e| {
                if e.is_retryable() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }
}
