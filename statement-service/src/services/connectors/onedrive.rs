use super::{classify_status, StorageConnector, StoredObject};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use service_core::error::AppError;

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

pub struct OneDriveConnector {
    client: Client,
    base_url: String,
    access_token: String,
}

#[derive(Deserialize)]
struct DriveItem {
    id: String,
    name: String,
    size: u64,
}

impl OneDriveConnector {
    pub fn new(client: Client, base_url: Option<&str>, access_token: String) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
            access_token,
        }
    }
}

#[async_trait]
impl StorageConnector for OneDriveConnector {
    async fn upload(
        &self,
        folder: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredObject, AppError> {
        let folder = folder.trim_matches('/');
        let response = self
            .client
            .put(format!(
                "{}/me/drive/root:/{}/{}:/content",
                self.base_url, folder, filename
            ))
            .bearer_auth(&self.access_token)
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        classify_status(response.status(), "onedrive upload")?;
        let item: DriveItem = response.json().await?;
        Ok(StoredObject {
            path: format!("{}/{} ({})", folder, item.name, item.id),
            size: item.size,
        })
    }

    async fn probe(&self) -> Result<(), AppError> {
        let response = self
            .client
            .get(format!("{}/me/drive", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        classify_status(response.status(), "onedrive probe")
    }
}
