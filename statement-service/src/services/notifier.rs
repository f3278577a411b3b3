//! Terminal-state notification hook.
//!
//! The actual notification layer (email/push content) is an external
//! collaborator; this seam reports pipeline events to it. The default
//! implementation records structured logs and metrics only.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    DeliverySucceeded {
        delivery_id: String,
        statement_id: String,
        destination_id: String,
    },
    DeliveryExhausted {
        delivery_id: String,
        statement_id: String,
        destination_id: String,
        error: String,
    },
    ConnectionNeedsRelink {
        connection_id: String,
        institution_name: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: PipelineEvent);
}

#[derive(Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::DeliverySucceeded {
                delivery_id,
                statement_id,
                destination_id,
            } => {
                metrics::counter!("pipeline_notifications_total", "event" => "delivery_succeeded")
                    .increment(1);
                tracing::info!(
                    delivery_id = %delivery_id,
                    statement_id = %statement_id,
                    destination_id = %destination_id,
                    "Delivery succeeded"
                );
            }
            PipelineEvent::DeliveryExhausted {
                delivery_id,
                statement_id,
                destination_id,
                error,
            } => {
                metrics::counter!("pipeline_notifications_total", "event" => "delivery_exhausted")
                    .increment(1);
                tracing::warn!(
                    delivery_id = %delivery_id,
                    statement_id = %statement_id,
                    destination_id = %destination_id,
                    error = %error,
                    "Delivery exhausted retry budget"
                );
            }
            PipelineEvent::ConnectionNeedsRelink {
                connection_id,
                institution_name,
            } => {
                metrics::counter!("pipeline_notifications_total", "event" => "relink_required")
                    .increment(1);
                tracing::warn!(
                    connection_id = %connection_id,
                    institution = %institution_name,
                    "Connection requires relink"
                );
            }
        }
    }
}
