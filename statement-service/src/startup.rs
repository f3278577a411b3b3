use crate::config::{AggregatorBackend, StatementConfig, StoreBackend};
use crate::handlers;
use crate::services::{
    Aggregator, LogNotifier, MemoryStore, MongoDb, MongoStore, Notifier, PlaidClient,
    SandboxAggregator, StatementStore, Vault,
};
use crate::workers::{
    DeliveryEngine, PipelineHandles, PipelineOrchestrator, StatementDetector, SyncEngine,
};
use axum::{
    routing::{get, post, put},
    Router,
};
use secrecy::Secret;
use service_core::error::AppError;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: StatementConfig,
    pub store: Arc<dyn StatementStore>,
    pub vault: Arc<Vault>,
    pub aggregator: Arc<dyn Aggregator>,
    pub notifier: Arc<dyn Notifier>,
    pub sync_engine: Arc<SyncEngine>,
    pub delivery_engine: Arc<DeliveryEngine>,
    pub handles: PipelineHandles,
    pub db: Option<MongoDb>,
    pub http: reqwest::Client,
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
    sandbox: Option<Arc<SandboxAggregator>>,
    shutdown: CancellationToken,
}

impl Application {
    pub async fn build(config: StatementConfig) -> Result<Self, AppError> {
        let vault = Arc::new(Vault::new(&config.vault.key_bytes()?)?);

        let (store, db): (Arc<dyn StatementStore>, Option<MongoDb>) = match config.store.backend {
            StoreBackend::Mongo => {
                let db = MongoDb::connect(&config.mongodb.uri, &config.mongodb.database)
                    .await
                    .map_err(|e| {
                        tracing::error!("Failed to connect to MongoDB: {}", e);
                        e
                    })?;
                db.initialize_indexes().await.map_err(|e| {
                    tracing::error!("Failed to initialize database indexes: {}", e);
                    e
                })?;
                (Arc::new(MongoStore::new(db.clone())), Some(db))
            }
            StoreBackend::Memory => (Arc::new(MemoryStore::new()), None),
        };

        let mut sandbox = None;
        let aggregator: Arc<dyn Aggregator> = match config.aggregator.backend {
            AggregatorBackend::Plaid => Arc::new(PlaidClient::new(
                config.aggregator.base_url.clone(),
                config.aggregator.client_id.clone(),
                Secret::new(config.aggregator.secret.clone()),
            )),
            AggregatorBackend::Sandbox => {
                let agg = Arc::new(SandboxAggregator::new());
                sandbox = Some(agg.clone());
                agg
            }
        };

        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new());

        let sync_engine = Arc::new(SyncEngine::new(
            store.clone(),
            aggregator.clone(),
            vault.clone(),
            notifier.clone(),
            config.worker.sync_retry_window(),
        ));
        let detector = Arc::new(StatementDetector::new(
            store.clone(),
            aggregator.clone(),
            vault.clone(),
            config.worker.initial_lookback_days,
        ));
        let delivery_engine = Arc::new(DeliveryEngine::new(
            store.clone(),
            aggregator.clone(),
            vault.clone(),
            notifier.clone(),
            config.worker.upload_timeout(),
        ));

        let (orchestrator, handles) = PipelineOrchestrator::new(
            config.worker.clone(),
            store.clone(),
            sync_engine.clone(),
            detector,
            delivery_engine.clone(),
        );
        let shutdown = orchestrator.shutdown_token();
        tokio::spawn(async move {
            orchestrator.start().await;
        });

        // Serves the destination test endpoint; a dead host must not hang
        // the handler past the configured budget.
        let http = reqwest::Client::builder()
            .timeout(config.worker.upload_timeout())
            .build()?;

        let state = AppState {
            config: config.clone(),
            store,
            vault,
            aggregator,
            notifier,
            sync_engine,
            delivery_engine,
            handles,
            db,
            http,
        };

        let app = Router::new()
            .route("/health", get(handlers::health::health_check))
            .route("/ready", get(handlers::health::readiness_check))
            .route("/metrics", get(handlers::health::metrics_endpoint))
            .route("/api/accounts", get(handlers::accounts::list_accounts))
            .route("/api/accounts/:id", get(handlers::accounts::get_account))
            .route(
                "/api/accounts/:id/sync",
                post(handlers::accounts::trigger_sync),
            )
            .route(
                "/api/accounts/:id/backfill",
                post(handlers::backfill::start_backfill),
            )
            .route("/api/backfill/:id", get(handlers::backfill::get_backfill))
            .route(
                "/api/backfill/:id/cancel",
                post(handlers::backfill::cancel_backfill),
            )
            .route(
                "/api/statements/:account_id",
                get(handlers::statements::list_statements),
            )
            .route(
                "/api/destinations",
                get(handlers::destinations::list_destinations)
                    .post(handlers::destinations::create_destination),
            )
            .route(
                "/api/destinations/:id/test",
                post(handlers::destinations::test_destination),
            )
            .route(
                "/api/routes",
                get(handlers::routes::list_routes).post(handlers::routes::create_route),
            )
            .route("/api/routes/:id", put(handlers::routes::update_route))
            .route(
                "/api/deliveries/:id/retry",
                post(handlers::deliveries::retry_delivery),
            )
            .route(
                "/api/notifications/preferences/:account_id",
                put(handlers::notifications::put_preferences),
            )
            .route(
                "/api/plaid/link_token",
                post(handlers::link::create_link_token),
            )
            .route(
                "/api/plaid/exchange_public_token",
                post(handlers::link::exchange_public_token),
            )
            .route(
                "/api/webhooks/aggregator",
                post(handlers::webhooks::aggregator_webhook),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
            sandbox,
            shutdown,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn store(&self) -> Arc<dyn StatementStore> {
        self.state.store.clone()
    }

    pub fn vault(&self) -> Arc<Vault> {
        self.state.vault.clone()
    }

    /// Programmable aggregator fixture; `Some` only under
    /// `AGGREGATOR_BACKEND=sandbox`.
    pub fn sandbox(&self) -> Option<Arc<SandboxAggregator>> {
        self.sandbox.clone()
    }

    /// Cancels the worker pools and scheduler.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}
