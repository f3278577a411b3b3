use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

/// Organization scope for every API resource, taken from the `X-Org-ID`
/// header set by the gateway in front of this service. Requests without it
/// are rejected.
#[derive(Debug, Clone)]
pub struct OrgId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for OrgId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let org_id = parts
            .headers
            .get("X-Org-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing X-Org-ID header"))
            })?;

        tracing::Span::current().record("org_id", org_id);

        Ok(OrgId(org_id.to_string()))
    }
}
