//! Delivery engine: executes one delivery attempt under the row lease.
//!
//! The pending -> in_progress claim is the idempotency guarantee; a claim
//! miss means another worker owns the row and this call does nothing.
//! Failed attempts back off exponentially on the row itself (base 30s,
//! capped at an hour, with jitter) until the budget of
//! [`MAX_DELIVERY_ATTEMPTS`] is spent, after which the delivery is
//! terminally failed and only a manual retry revives it.

use crate::models::{
    Account, Delivery, Destination, DestinationKind, RoutingRule, Statement,
    MAX_DELIVERY_ATTEMPTS,
};
use crate::services::aggregator::Aggregator;
use crate::services::connectors::{
    DropboxConnector, GoogleDriveConnector, OneDriveConnector, StorageConnector, StoredObject,
    WebhookConnector,
};
use crate::services::notifier::{Notifier, PipelineEvent};
use crate::services::store::StatementStore;
use crate::services::vault::Vault;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use reqwest::Client;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};

const BACKOFF_BASE_SECS: u64 = 30;
const BACKOFF_CAP_SECS: u64 = 3600;
/// Fractional jitter applied either side of the computed delay.
const BACKOFF_JITTER: f64 = 0.2;

const DEFAULT_FOLDER: &str = "Statements";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Attempt failed; the row is pending again with a later due time.
    Retrying { attempt: u32 },
    /// Retry budget spent; the row is terminally failed.
    Exhausted,
    /// Another worker holds the lease, or the row is terminal/not yet due.
    AlreadyClaimed,
}

pub struct DeliveryEngine {
    store: Arc<dyn StatementStore>,
    aggregator: Arc<dyn Aggregator>,
    vault: Arc<Vault>,
    notifier: Arc<dyn Notifier>,
    http: Client,
}

impl DeliveryEngine {
    pub fn new(
        store: Arc<dyn StatementStore>,
        aggregator: Arc<dyn Aggregator>,
        vault: Arc<Vault>,
        notifier: Arc<dyn Notifier>,
        upload_timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .timeout(upload_timeout)
            .build()
            .expect("reqwest client");
        Self {
            store,
            aggregator,
            vault,
            notifier,
            http,
        }
    }

    pub async fn deliver(&self, delivery_id: &str) -> Result<DeliveryOutcome, AppError> {
        let now = Utc::now();
        let Some(claimed) = self.store.claim_delivery(delivery_id, now).await? else {
            return Ok(DeliveryOutcome::AlreadyClaimed);
        };

        let start = Instant::now();
        metrics::counter!("statement_delivery_total").increment(1);

        match self.execute(&claimed).await {
            Ok(stored) => {
                let delivered_at = Utc::now();
                self.store
                    .complete_delivery(
                        delivery_id,
                        delivered_at,
                        stored.as_ref().map(|s| s.path.clone()),
                        stored.as_ref().map(|s| s.size),
                    )
                    .await?;
                self.notifier
                    .notify(PipelineEvent::DeliverySucceeded {
                        delivery_id: delivery_id.to_string(),
                        statement_id: claimed.statement_id.clone(),
                        destination_id: claimed.destination_id.clone(),
                    })
                    .await;
                metrics::counter!("statement_delivery_success").increment(1);
                metrics::histogram!("statement_delivery_duration")
                    .record(start.elapsed().as_secs_f64());
                Ok(DeliveryOutcome::Delivered)
            }
            Err(e) => self.handle_failure(&claimed, e).await,
        }
    }

    async fn handle_failure(
        &self,
        claimed: &Delivery,
        error: AppError,
    ) -> Result<DeliveryOutcome, AppError> {
        let attempt = claimed.attempts;
        let retryable = match &error {
            // Bad templates and bad configuration never fix themselves.
            AppError::TemplateError(_)
            | AppError::ValidationError(_)
            | AppError::CryptoError(_)
            | AppError::NotFound(_) => false,
            _ => true,
        };

        metrics::counter!("statement_delivery_failed").increment(1);

        if retryable && attempt < MAX_DELIVERY_ATTEMPTS {
            let next = next_attempt_time(Utc::now(), attempt);
            self.store
                .fail_delivery(&claimed.id, error.to_string(), Some(next))
                .await?;
            tracing::warn!(
                delivery_id = %claimed.id,
                attempt = attempt,
                next_attempt_at = %next,
                error = %error,
                "Delivery attempt failed; scheduled retry"
            );
            Ok(DeliveryOutcome::Retrying { attempt })
        } else {
            self.store
                .fail_delivery(&claimed.id, error.to_string(), None)
                .await?;
            self.notifier
                .notify(PipelineEvent::DeliveryExhausted {
                    delivery_id: claimed.id.clone(),
                    statement_id: claimed.statement_id.clone(),
                    destination_id: claimed.destination_id.clone(),
                    error: error.to_string(),
                })
                .await;
            metrics::counter!("statement_delivery_exhausted").increment(1);
            tracing::error!(
                delivery_id = %claimed.id,
                attempts = attempt,
                error = %error,
                "Delivery terminally failed"
            );
            Ok(DeliveryOutcome::Exhausted)
        }
    }

    /// Run one attempt. Returns the stored object for cloud uploads, `None`
    /// for webhooks.
    async fn execute(&self, delivery: &Delivery) -> Result<Option<StoredObject>, AppError> {
        let statement = self
            .store
            .get_statement(&delivery.statement_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "statement {} not found",
                    delivery.statement_id
                ))
            })?;
        let account = self
            .store
            .get_account(&statement.account_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("account {} not found", statement.account_id))
            })?;
        let destination = self
            .store
            .get_destination(&delivery.destination_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "destination {} not found",
                    delivery.destination_id
                ))
            })?;
        let rule = self
            .store
            .get_routing_rule(&delivery.routing_rule_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "routing rule {} not found",
                    delivery.routing_rule_id
                ))
            })?;

        match destination.kind {
            DestinationKind::Webhook => {
                self.send_webhook(delivery, &statement, &account, &destination)
                    .await?;
                Ok(None)
            }
            _ => self
                .upload_to_storage(delivery, &statement, &account, &destination, &rule)
                .await
                .map(Some),
        }
    }

    async fn send_webhook(
        &self,
        delivery: &Delivery,
        statement: &Statement,
        account: &Account,
        destination: &Destination,
    ) -> Result<(), AppError> {
        let url = destination
            .config_value("url")
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "webhook destination {} has no url",
                    destination.id
                ))
            })?
            .to_string();
        let secret_enc = destination.config_value("secret_enc").ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "webhook destination {} has no secret",
                destination.id
            ))
        })?;
        let secret = self.vault.decrypt(secret_enc)?;

        let payload = serde_json::json!({
            "event": "statement.available",
            "statement": {
                "id": statement.id,
                "period_start": statement.period_start,
                "period_end": statement.period_end,
                "statement_date": statement.statement_date,
                "file_type": statement.file_type,
                "version": statement.version,
                "checksum": statement.checksum,
            },
            "account": {
                "id": account.id,
                "name": account.name,
                "mask": account.mask,
            },
            "destination": { "id": destination.id, "name": destination.name },
            "delivered_at": Utc::now(),
            "request_id": delivery.request_id,
        });

        WebhookConnector::new(self.http.clone())
            .send(&url, &secret, &delivery.request_id, &payload)
            .await
    }

    async fn upload_to_storage(
        &self,
        _delivery: &Delivery,
        statement: &Statement,
        account: &Account,
        destination: &Destination,
        rule: &RoutingRule,
    ) -> Result<StoredObject, AppError> {
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

        let template = rule
            .filename_template
            .as_deref()
            .unwrap_or(crate::workers::template::DEFAULT_TEMPLATE);
        let filename = crate::workers::template::render_filename(
            template,
            &crate::workers::template::TemplateContext {
                institution: &connection.institution_name,
                account_last4: &account.mask,
                period_end: statement.period_end,
                file_type: statement.file_type,
            },
        )?;

        let folder = rule
            .folder_override
            .as_deref()
            .or_else(|| destination.config_value("folder_path"))
            .unwrap_or(DEFAULT_FOLDER)
            .to_string();

        let bank_token = self.vault.decrypt(&connection.access_token_enc)?;
        let bytes = self
            .aggregator
            .download_statement(&bank_token, &statement.upstream_statement_id)
            .await?;

        let connector = self.storage_connector(destination)?;
        connector.upload(&folder, &filename, bytes).await
    }

    /// Build the connector for a cloud-storage destination, decrypting its
    /// provider token from the destination config.
    pub fn storage_connector(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn StorageConnector>, AppError> {
        let token_enc = destination.config_value("access_token_enc").ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "destination {} has no provider token",
                destination.id
            ))
        })?;
        let token = self.vault.decrypt(token_enc)?;
        let base_url = destination.config_value("base_url");

        Ok(match destination.kind {
            DestinationKind::Dropbox => {
                Box::new(DropboxConnector::new(self.http.clone(), base_url, token))
            }
            DestinationKind::GoogleDrive => {
                Box::new(GoogleDriveConnector::new(self.http.clone(), base_url, token))
            }
            DestinationKind::Onedrive => {
                Box::new(OneDriveConnector::new(self.http.clone(), base_url, token))
            }
            DestinationKind::Webhook => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "webhook destinations have no storage connector"
                )))
            }
        })
    }
}

/// Due time for the next attempt: exponential in the attempt number, capped,
/// with +/-20% jitter so retries do not synchronize.
pub fn next_attempt_time(now: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
    let exp = attempt.saturating_sub(1).min(16);
    let base = BACKOFF_BASE_SECS.saturating_mul(1u64 << exp);
    let capped = base.min(BACKOFF_CAP_SECS) as f64;

    let jitter = rand::thread_rng().gen_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
    let delay = (capped * (1.0 + jitter)).max(1.0);
    now + ChronoDuration::seconds(delay as i64)
}
