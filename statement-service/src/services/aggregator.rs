//! Bank aggregator client.
//!
//! Implements the Plaid-style item/accounts/statements API used for
//! connection sync, statement detection and statement downloads. A
//! programmable in-process sandbox backs tests and `AGGREGATOR_BACKEND=sandbox`
//! runs.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Upstream error codes that mean the item credential is no longer valid
/// and the user must relink.
const AUTH_EXPIRY_CODES: &[&str] = &["ITEM_LOGIN_REQUIRED", "INVALID_ACCESS_TOKEN"];

#[derive(Debug, Clone, Deserialize)]
pub struct LinkToken {
    pub link_token: String,
    pub expiration: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenExchange {
    pub access_token: String,
    pub item_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemStatus {
    pub item_id: String,
    pub institution_id: String,
    pub institution_name: String,
    /// Upstream error code when the item is unhealthy.
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamAccount {
    pub account_id: String,
    pub name: String,
    pub mask: String,
    #[serde(rename = "type")]
    pub account_type: String,
    pub subtype: Option<String>,
    pub statements_supported: bool,
}

/// Content descriptor for one upstream statement. Checksumming works off
/// this descriptor, so detection never has to download bytes.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamStatement {
    pub statement_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub statement_date: NaiveDate,
    pub file_type: String,
    pub byte_size: u64,
    pub content_hash: Option<String>,
}

#[async_trait]
pub trait Aggregator: Send + Sync {
    async fn create_link_token(&self, org_id: &str) -> Result<LinkToken, AppError>;
    async fn exchange_public_token(&self, public_token: &str) -> Result<TokenExchange, AppError>;
    async fn item_status(&self, access_token: &str) -> Result<ItemStatus, AppError>;
    async fn list_accounts(&self, access_token: &str) -> Result<Vec<UpstreamAccount>, AppError>;
    async fn list_statements(
        &self,
        access_token: &str,
        upstream_account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UpstreamStatement>, AppError>;
    async fn download_statement(
        &self,
        access_token: &str,
        upstream_statement_id: &str,
    ) -> Result<Vec<u8>, AppError>;
}

// ---------------------------------------------------------------------------
// Live client

#[derive(Clone)]
pub struct PlaidClient {
    client: Client,
    base_url: String,
    client_id: String,
    secret: Secret<String>,
}

#[derive(Serialize)]
struct AuthedRequest<'a, T: Serialize> {
    client_id: &'a str,
    secret: &'a str,
    #[serde(flatten)]
    body: T,
}

#[derive(Deserialize)]
struct UpstreamErrorBody {
    error_code: Option<String>,
    error_message: Option<String>,
}

impl PlaidClient {
    pub fn new(base_url: String, client_id: String, secret: Secret<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url,
            client_id,
            secret,
        }
    }

    async fn post<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: T,
    ) -> Result<R, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let request = AuthedRequest {
            client_id: &self.client_id,
            secret: self.secret.expose_secret(),
            body,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if status.is_server_error() {
            return Err(AppError::Transient(anyhow::anyhow!(
                "aggregator returned {} for {}",
                status,
                path
            )));
        }

        if !status.is_success() {
            let err: UpstreamErrorBody = response.json().await.unwrap_or(UpstreamErrorBody {
                error_code: None,
                error_message: None,
            });
            let code = err.error_code.unwrap_or_else(|| status.to_string());
            if AUTH_EXPIRY_CODES.contains(&code.as_str()) {
                return Err(AppError::AuthExpired(code));
            }
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "aggregator error {}: {}",
                code,
                err.error_message.unwrap_or_default()
            )));
        }

        Ok(response.json().await?)
    }
}

#[derive(Deserialize)]
struct AccountsResponse {
    accounts: Vec<UpstreamAccount>,
}

#[derive(Deserialize)]
struct StatementsResponse {
    statements: Vec<UpstreamStatement>,
}

#[async_trait]
impl Aggregator for PlaidClient {
    async fn create_link_token(&self, org_id: &str) -> Result<LinkToken, AppError> {
        self.post(
            "/link/token/create",
            serde_json::json!({ "client_name": "statement-service", "user": { "client_user_id": org_id } }),
        )
        .await
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<TokenExchange, AppError> {
        self.post(
            "/item/public_token/exchange",
            serde_json::json!({ "public_token": public_token }),
        )
        .await
    }

    async fn item_status(&self, access_token: &str) -> Result<ItemStatus, AppError> {
        self.post("/item/get", serde_json::json!({ "access_token": access_token }))
            .await
    }

    async fn list_accounts(&self, access_token: &str) -> Result<Vec<UpstreamAccount>, AppError> {
        let response: AccountsResponse = self
            .post("/accounts/get", serde_json::json!({ "access_token": access_token }))
            .await?;
        Ok(response.accounts)
    }

    async fn list_statements(
        &self,
        access_token: &str,
        upstream_account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UpstreamStatement>, AppError> {
        let response: StatementsResponse = self
            .post(
                "/statements/list",
                serde_json::json!({
                    "access_token": access_token,
                    "account_id": upstream_account_id,
                    "start_date": start.to_string(),
                    "end_date": end.to_string(),
                }),
            )
            .await?;
        Ok(response.statements)
    }

    async fn download_statement(
        &self,
        access_token: &str,
        upstream_statement_id: &str,
    ) -> Result<Vec<u8>, AppError> {
        let url = format!("{}/statements/download", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "client_id": self.client_id,
                "secret": self.secret.expose_secret(),
                "statement_id": upstream_statement_id,
                "access_token": access_token,
            }))
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AppError::Transient(anyhow::anyhow!(
                "statement download returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "statement download failed with {}",
                status
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Sandbox

#[derive(Default)]
struct SandboxState {
    /// Extra statements keyed by upstream account id, pushed by tests.
    statements: HashMap<String, Vec<UpstreamStatement>>,
    /// Extra accounts keyed by access token, on top of the default one.
    accounts: HashMap<String, Vec<UpstreamAccount>>,
    /// Tokens that should behave as auth-expired.
    expired_tokens: Vec<String>,
}

/// Deterministic in-process aggregator. Every token resolves to one
/// checking account; statements are whatever was pushed via
/// [`SandboxAggregator::push_statement`].
#[derive(Default)]
pub struct SandboxAggregator {
    state: Mutex<SandboxState>,
}

impl SandboxAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_statement(&self, upstream_account_id: &str, statement: UpstreamStatement) {
        let mut state = self.state.lock().expect("sandbox state");
        state
            .statements
            .entry(upstream_account_id.to_string())
            .or_default()
            .push(statement);
    }

    /// Attach an additional account to a token, on top of the default
    /// checking account every token resolves to.
    pub fn push_account(&self, access_token: &str, account: UpstreamAccount) {
        let mut state = self.state.lock().expect("sandbox state");
        state
            .accounts
            .entry(access_token.to_string())
            .or_default()
            .push(account);
    }

    pub fn expire_token(&self, access_token: &str) {
        let mut state = self.state.lock().expect("sandbox state");
        state.expired_tokens.push(access_token.to_string());
    }

    fn check_token(&self, access_token: &str) -> Result<(), AppError> {
        let state = self.state.lock().expect("sandbox state");
        if state.expired_tokens.iter().any(|t| t == access_token) {
            return Err(AppError::AuthExpired("ITEM_LOGIN_REQUIRED".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Aggregator for SandboxAggregator {
    async fn create_link_token(&self, _org_id: &str) -> Result<LinkToken, AppError> {
        Ok(LinkToken {
            link_token: format!("link-sandbox-{}", uuid::Uuid::new_v4()),
            expiration: "1970-01-01T00:30:00Z".to_string(),
        })
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<TokenExchange, AppError> {
        let suffix = public_token
            .strip_prefix("public-sandbox-")
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("unknown public token")))?;
        Ok(TokenExchange {
            access_token: format!("access-sandbox-{}", suffix),
            item_id: format!("item-sandbox-{}", suffix),
        })
    }

    async fn item_status(&self, access_token: &str) -> Result<ItemStatus, AppError> {
        self.check_token(access_token)?;
        Ok(ItemStatus {
            item_id: access_token.replace("access-", "item-"),
            institution_id: "ins_sandbox".to_string(),
            institution_name: "First Platypus Bank".to_string(),
            error_code: None,
        })
    }

    async fn list_accounts(&self, access_token: &str) -> Result<Vec<UpstreamAccount>, AppError> {
        self.check_token(access_token)?;
        let mut accounts = vec![UpstreamAccount {
            account_id: access_token.replace("access-", "acct-"),
            name: "Plaid Checking".to_string(),
            mask: "0000".to_string(),
            account_type: "depository".to_string(),
            subtype: Some("checking".to_string()),
            statements_supported: true,
        }];
        let state = self.state.lock().expect("sandbox state");
        if let Some(extra) = state.accounts.get(access_token) {
            accounts.extend(extra.iter().cloned());
        }
        Ok(accounts)
    }

    async fn list_statements(
        &self,
        access_token: &str,
        upstream_account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UpstreamStatement>, AppError> {
        self.check_token(access_token)?;
        let state = self.state.lock().expect("sandbox state");
        Ok(state
            .statements
            .get(upstream_account_id)
            .map(|all| {
                all.iter()
                    .filter(|s| s.period_end >= start && s.period_start <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn download_statement(
        &self,
        access_token: &str,
        upstream_statement_id: &str,
    ) -> Result<Vec<u8>, AppError> {
        self.check_token(access_token)?;
        Ok(format!("%PDF-1.4 sandbox statement {}", upstream_statement_id).into_bytes())
    }
}
