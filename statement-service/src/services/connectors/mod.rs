//! Destination connectors.
//!
//! One client per destination kind. Cloud-storage connectors implement
//! [`StorageConnector`]; the webhook connector sends signed JSON payloads.
//! Base URLs are configurable per destination so tests can point them at a
//! local mock server.

pub mod dropbox;
pub mod google_drive;
pub mod onedrive;
pub mod webhook;

pub use dropbox::DropboxConnector;
pub use google_drive::GoogleDriveConnector;
pub use onedrive::OneDriveConnector;
pub use webhook::WebhookConnector;

use async_trait::async_trait;
use service_core::error::AppError;

/// Result of a cloud-storage upload, recorded on the delivery row.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub path: String,
    pub size: u64,
}

#[async_trait]
pub trait StorageConnector: Send + Sync {
    async fn upload(
        &self,
        folder: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredObject, AppError>;

    /// Lightweight reachability probe used by destination test requests.
    async fn probe(&self) -> Result<(), AppError>;
}

/// Map an upstream HTTP status to the retry taxonomy: 5xx and 429 are
/// transient, everything else non-retryable.
pub(crate) fn classify_status(
    status: reqwest::StatusCode,
    context: &str,
) -> Result<(), AppError> {
    if status.is_success() {
        return Ok(());
    }
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(AppError::Transient(anyhow::anyhow!(
            "{} returned {}",
            context,
            status
        )));
    }
    Err(AppError::BadRequest(anyhow::anyhow!(
        "{} returned {}",
        context,
        status
    )))
}
