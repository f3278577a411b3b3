use super::{classify_status, StorageConnector, StoredObject};
use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;
use service_core::error::AppError;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

pub struct GoogleDriveConnector {
    client: Client,
    base_url: String,
    access_token: String,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    size: Option<String>,
}

impl GoogleDriveConnector {
    pub fn new(client: Client, base_url: Option<&str>, access_token: String) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
            access_token,
        }
    }
}

#[async_trait]
impl StorageConnector for GoogleDriveConnector {
    async fn upload(
        &self,
        folder: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredObject, AppError> {
        let size = bytes.len() as u64;
        let metadata = serde_json::json!({
            "name": filename,
            "parents": [folder],
        });

        let form = multipart::Form::new()
            .part(
                "metadata",
                multipart::Part::text(metadata.to_string())
                    .mime_str("application/json")
                    .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?,
            )
            .part(
                "file",
                multipart::Part::bytes(bytes)
                    .mime_str("application/octet-stream")
                    .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?,
            );

        let response = self
            .client
            .post(format!(
                "{}/upload/drive/v3/files?uploadType=multipart&fields=id,name,size",
                self.base_url
            ))
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await?;

        classify_status(response.status(), "google drive upload")?;
        let file: DriveFile = response.json().await?;
        let size = file
            .size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(size);
        Ok(StoredObject {
            path: format!("{}/{}", file.id, file.name),
            size,
        })
    }

    async fn probe(&self) -> Result<(), AppError> {
        let response = self
            .client
            .get(format!("{}/drive/v3/about?fields=user", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        classify_status(response.status(), "google drive probe")
    }
}
