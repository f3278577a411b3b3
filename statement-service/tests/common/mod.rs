#![allow(dead_code)]

use chrono::NaiveDate;
use service_core::config::Config as CoreConfig;
use statement_service::config::{
    AggregatorBackend, AggregatorConfig, MongoConfig, StatementConfig, StoreBackend, StoreConfig,
    VaultConfig, WorkerConfig,
};
use statement_service::models::{
    Account, Connection, Destination, DestinationKind, RoutingRule,
};
use statement_service::services::aggregator::UpstreamStatement;
use statement_service::services::{
    LogNotifier, MemoryStore, Notifier, SandboxAggregator, StatementStore, Vault,
};
use statement_service::startup::Application;
use statement_service::workers::{DeliveryEngine, StatementDetector, SyncEngine};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const VAULT_KEY_HEX: &str =
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
pub const AGGREGATOR_SECRET: &str = "test-aggregator-secret";

pub fn test_config() -> StatementConfig {
    StatementConfig {
        common: CoreConfig { port: 0 },
        mongodb: MongoConfig {
            uri: "mongodb://unused:27017".to_string(),
            database: "unused".to_string(),
        },
        store: StoreConfig {
            backend: StoreBackend::Memory,
        },
        vault: VaultConfig {
            key_hex: VAULT_KEY_HEX.to_string(),
        },
        aggregator: AggregatorConfig {
            backend: AggregatorBackend::Sandbox,
            base_url: "http://unused".to_string(),
            client_id: "test-client".to_string(),
            secret: AGGREGATOR_SECRET.to_string(),
        },
        worker: WorkerConfig {
            enabled: true,
            sync_workers: 2,
            detect_workers: 2,
            delivery_workers: 2,
            queue_size: 64,
            // Long intervals keep the scheduler quiet; tests drive the
            // queues directly.
            poll_interval_secs: 3600,
            sync_interval_secs: 3600,
            detect_interval_secs: 3600,
            delivery_batch: 50,
            sync_retry_window_secs: 1,
            upload_timeout_secs: 2,
            initial_lookback_days: 365,
        },
    }
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub store: Arc<dyn StatementStore>,
    pub vault: Arc<Vault>,
    pub sandbox: Arc<SandboxAggregator>,
    pub shutdown: CancellationToken,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let application = Application::build(test_config())
            .await
            .expect("failed to build application");

        let store = application.store();
        let vault = application.vault();
        let sandbox = application.sandbox().expect("sandbox aggregator");
        let shutdown = application.shutdown_token();
        let address = format!("http://127.0.0.1:{}", application.port());

        tokio::spawn(application.run_until_stopped());

        Self {
            address,
            client: reqwest::Client::new(),
            store,
            vault,
            sandbox,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Engine-level harness: memory store, sandbox aggregator and the three
/// pipeline engines, without the HTTP layer or worker pools.
pub struct Harness {
    pub store: Arc<dyn StatementStore>,
    pub vault: Arc<Vault>,
    pub sandbox: Arc<SandboxAggregator>,
    pub sync: SyncEngine,
    pub detector: StatementDetector,
    pub deliverer: DeliveryEngine,
}

pub fn harness() -> Harness {
    let store: Arc<dyn StatementStore> = Arc::new(MemoryStore::new());
    let vault = Arc::new(Vault::new(&hex::decode(VAULT_KEY_HEX).unwrap()).unwrap());
    let sandbox = Arc::new(SandboxAggregator::new());
    let aggregator: Arc<dyn statement_service::services::Aggregator> = sandbox.clone();
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new());

    let sync = SyncEngine::new(
        store.clone(),
        aggregator.clone(),
        vault.clone(),
        notifier.clone(),
        Duration::from_secs(1),
    );
    let detector = StatementDetector::new(store.clone(), aggregator.clone(), vault.clone(), 365);
    let deliverer = DeliveryEngine::new(
        store.clone(),
        aggregator,
        vault.clone(),
        notifier,
        Duration::from_secs(5),
    );

    Harness {
        store,
        vault,
        sandbox,
        sync,
        detector,
        deliverer,
    }
}

impl Harness {
    pub async fn seed_connection(&self, org_id: &str) -> Connection {
        let token_enc = self.vault.encrypt("access-sandbox-test").unwrap();
        let connection = Connection::new(
            org_id.to_string(),
            "item-sandbox-test".to_string(),
            "ins_sandbox".to_string(),
            "First Platypus Bank".to_string(),
            token_enc,
        );
        self.store.insert_connection(connection.clone()).await.unwrap();
        connection
    }

    pub async fn seed_account(&self, connection: &Connection) -> Account {
        let account = Account::new(
            connection.org_id.clone(),
            connection.id.clone(),
            "acct-sandbox-test".to_string(),
            "Plaid Checking".to_string(),
            "0000".to_string(),
            "depository".to_string(),
            Some("checking".to_string()),
            true,
        );
        self.store.upsert_account(account).await.unwrap()
    }

    pub async fn seed_webhook_destination(&self, org_id: &str, url: &str) -> Destination {
        let mut config = HashMap::new();
        config.insert("url".to_string(), url.to_string());
        config.insert(
            "secret_enc".to_string(),
            self.vault.encrypt("whsec_test").unwrap(),
        );
        let destination = Destination::new(
            org_id.to_string(),
            DestinationKind::Webhook,
            "ops webhook".to_string(),
            config,
        );
        self.store.insert_destination(destination.clone()).await.unwrap();
        destination
    }

    pub async fn seed_dropbox_destination(&self, org_id: &str, base_url: &str) -> Destination {
        let mut config = HashMap::new();
        config.insert("base_url".to_string(), base_url.to_string());
        config.insert(
            "access_token_enc".to_string(),
            self.vault.encrypt("dbx-token").unwrap(),
        );
        config.insert("folder_path".to_string(), "Statements".to_string());
        let destination = Destination::new(
            org_id.to_string(),
            DestinationKind::Dropbox,
            "team dropbox".to_string(),
            config,
        );
        self.store.insert_destination(destination.clone()).await.unwrap();
        destination
    }

    pub async fn seed_rule(&self, account: &Account, destination: &Destination) -> RoutingRule {
        let rule = RoutingRule::new(
            account.org_id.clone(),
            account.id.clone(),
            destination.id.clone(),
            None,
            None,
        );
        self.store.insert_routing_rule(rule.clone()).await.unwrap();
        rule
    }
}

pub fn upstream_statement(id: &str, period_start: &str, period_end: &str) -> UpstreamStatement {
    UpstreamStatement {
        statement_id: id.to_string(),
        period_start: period_start.parse().unwrap(),
        period_end: period_end.parse().unwrap(),
        statement_date: period_end.parse().unwrap(),
        file_type: "pdf".to_string(),
        byte_size: 4096,
        content_hash: Some(format!("hash-{}", id)),
    }
}

pub fn recent_period() -> (String, String) {
    // A period safely inside the detector's lookback window.
    let today = chrono::Utc::now().date_naive();
    let start = today - chrono::Duration::days(60);
    let end = today - chrono::Duration::days(31);
    (start.to_string(), end.to_string())
}

pub fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}
