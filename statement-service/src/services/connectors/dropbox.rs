use super::{classify_status, StorageConnector, StoredObject};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use service_core::error::AppError;

const DEFAULT_BASE_URL: &str = "https://content.dropboxapi.com";

pub struct DropboxConnector {
    client: Client,
    base_url: String,
    access_token: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    path_display: String,
    size: u64,
}

impl DropboxConnector {
    pub fn new(client: Client, base_url: Option<&str>, access_token: String) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
            access_token,
        }
    }
}

#[async_trait]
impl StorageConnector for DropboxConnector {
    async fn upload(
        &self,
        folder: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredObject, AppError> {
        let path = format!("/{}/{}", folder.trim_matches('/'), filename);
        let api_arg = serde_json::json!({
            "path": path,
            "mode": "overwrite",
            "autorename": false,
            "mute": true,
        });

        let response = self
            .client
            .post(format!("{}/2/files/upload", self.base_url))
            .bearer_auth(&self.access_token)
            .header("Dropbox-API-Arg", api_arg.to_string())
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        classify_status(response.status(), "dropbox upload")?;
        let uploaded: UploadResponse = response.json().await?;
        Ok(StoredObject {
            path: uploaded.path_display,
            size: uploaded.size,
        })
    }

    async fn probe(&self) -> Result<(), AppError> {
        let response = self
            .client
            .post(format!("{}/2/users/get_space_usage", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        classify_status(response.status(), "dropbox probe")
    }
}
