use super::classify_status;
use reqwest::Client;
use service_core::error::AppError;
use service_core::utils::signature::sign_payload;

/// Signed webhook sender. The signature covers the exact bytes on the wire,
/// so the payload is serialized once and reused for both.
pub struct WebhookConnector {
    client: Client,
}

impl WebhookConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// POST `payload` to `url` with `X-Signature: hex(HMAC-SHA256(body))`.
    /// Any non-2xx response is a failed delivery attempt.
    pub async fn send(
        &self,
        url: &str,
        secret: &str,
        request_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), AppError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("payload encode: {}", e)))?;
        let signature = sign_payload(secret, &body);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Signature", signature)
            .header("X-Request-Id", request_id)
            .body(body)
            .send()
            .await?;

        classify_status(response.status(), "webhook post")
    }
}
