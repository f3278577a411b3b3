pub mod aggregator;
pub mod connectors;
pub mod database;
pub mod metrics;
pub mod notifier;
pub mod store;
pub mod vault;

pub use aggregator::{Aggregator, PlaidClient, SandboxAggregator};
pub use database::MongoDb;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{LogNotifier, Notifier, PipelineEvent};
pub use store::{MemoryStore, MongoStore, StatementStore};
pub use vault::Vault;
