use crate::models::{Account, BackfillJob, Connection, Delivery, Destination, RoutingRule, Statement};
use mongodb::{
    bson::doc, options::IndexOptions, Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for statement-service");

        let statement_version_index = IndexModel::builder()
            .keys(doc! { "account_id": 1, "period_start": 1, "period_end": 1, "version": 1 })
            .options(
                IndexOptions::builder()
                    .name("statement_period_version".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.statements()
            .create_index(statement_version_index, None)
            .await
            .map_err(AppError::from)?;

        let delivery_pair_index = IndexModel::builder()
            .keys(doc! { "statement_id": 1, "destination_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("delivery_pair_lookup".to_string())
                    .build(),
            )
            .build();
        self.deliveries()
            .create_index(delivery_pair_index, None)
            .await
            .map_err(AppError::from)?;

        let account_upstream_index = IndexModel::builder()
            .keys(doc! { "connection_id": 1, "upstream_account_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("account_upstream_lookup".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.accounts()
            .create_index(account_upstream_index, None)
            .await
            .map_err(AppError::from)?;

        let rule_account_index = IndexModel::builder()
            .keys(doc! { "account_id": 1, "active": 1 })
            .options(
                IndexOptions::builder()
                    .name("rule_account_lookup".to_string())
                    .build(),
            )
            .build();
        self.routing_rules()
            .create_index(rule_account_index, None)
            .await
            .map_err(AppError::from)?;

        tracing::info!("MongoDB indexes ready");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }

    pub fn connections(&self) -> Collection<Connection> {
        self.db.collection("connections")
    }

    pub fn accounts(&self) -> Collection<Account> {
        self.db.collection("accounts")
    }

    pub fn statements(&self) -> Collection<Statement> {
        self.db.collection("statements")
    }

    pub fn destinations(&self) -> Collection<Destination> {
        self.db.collection("destinations")
    }

    pub fn routing_rules(&self) -> Collection<RoutingRule> {
        self.db.collection("routing_rules")
    }

    pub fn deliveries(&self) -> Collection<Delivery> {
        self.db.collection("deliveries")
    }

    pub fn backfill_jobs(&self) -> Collection<BackfillJob> {
        self.db.collection("backfill_jobs")
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}
