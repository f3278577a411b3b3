use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct StatementConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub store: StoreConfig,
    pub vault: VaultConfig,
    pub aggregator: AggregatorConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    /// 32-byte AES-256-GCM key, hex-encoded.
    pub key_hex: String,
}

impl VaultConfig {
    pub fn key_bytes(&self) -> Result<Vec<u8>, AppError> {
        hex::decode(&self.key_hex)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("VAULT_KEY_HEX is not hex: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    pub backend: AggregatorBackend,
    pub base_url: String,
    pub client_id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AggregatorBackend {
    Plaid,
    Sandbox,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub sync_workers: usize,
    pub detect_workers: usize,
    pub delivery_workers: usize,
    pub queue_size: usize,
    pub poll_interval_secs: u64,
    pub sync_interval_secs: u64,
    pub detect_interval_secs: u64,
    pub delivery_batch: usize,
    pub sync_retry_window_secs: u64,
    pub upload_timeout_secs: u64,
    pub initial_lookback_days: i64,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn sync_retry_window(&self) -> Duration {
        Duration::from_secs(self.sync_retry_window_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

impl StatementConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common_config = core_config::Config::load()?;

        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Ok(StatementConfig {
            common: common_config,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("statement_db"), is_prod)?,
            },
            store: StoreConfig {
                backend: get_env("STORE_BACKEND", Some("mongo"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            vault: VaultConfig {
                // Dev default only; production requires an explicit key.
                key_hex: get_env(
                    "VAULT_KEY_HEX",
                    Some("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"),
                    is_prod,
                )?,
            },
            aggregator: AggregatorConfig {
                backend: get_env("AGGREGATOR_BACKEND", Some("sandbox"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                base_url: get_env(
                    "AGGREGATOR_BASE_URL",
                    Some("https://sandbox.plaid.com"),
                    is_prod,
                )?,
                client_id: get_env("AGGREGATOR_CLIENT_ID", Some("sandbox-client"), is_prod)?,
                secret: get_env("AGGREGATOR_SECRET", Some("sandbox-secret"), is_prod)?,
            },
            worker: WorkerConfig {
                enabled: get_env("WORKERS_ENABLED", Some("true"), false)? == "true",
                sync_workers: parse_env("SYNC_WORKERS", 2)?,
                detect_workers: parse_env("DETECT_WORKERS", 2)?,
                delivery_workers: parse_env("DELIVERY_WORKERS", 4)?,
                queue_size: parse_env("WORKER_QUEUE_SIZE", 256)?,
                poll_interval_secs: parse_env("POLL_INTERVAL_SECS", 60)?,
                sync_interval_secs: parse_env("SYNC_INTERVAL_SECS", 6 * 3600)?,
                detect_interval_secs: parse_env("DETECT_INTERVAL_SECS", 12 * 3600)?,
                delivery_batch: parse_env("DELIVERY_BATCH", 50)?,
                sync_retry_window_secs: parse_env("SYNC_RETRY_WINDOW_SECS", 60)?,
                upload_timeout_secs: parse_env("UPLOAD_TIMEOUT_SECS", 60)?,
                initial_lookback_days: parse_env("INITIAL_LOOKBACK_DAYS", 365)?,
            },
        })
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mongo" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

impl std::str::FromStr for AggregatorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plaid" => Ok(AggregatorBackend::Plaid),
            "sandbox" => Ok(AggregatorBackend::Sandbox),
            _ => Err(format!("Invalid aggregator backend: {}", s)),
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e))),
        Err(_) => Ok(default),
    }
}
