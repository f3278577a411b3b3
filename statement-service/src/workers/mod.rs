pub mod backfill;
pub mod deliverer;
pub mod detector;
pub mod orchestrator;
pub mod router;
pub mod sync;
pub mod template;

pub use deliverer::{DeliveryEngine, DeliveryOutcome};
pub use detector::{DetectionSkip, DetectionTask, StatementDetector};
pub use orchestrator::{DeliveryTask, PipelineHandles, PipelineOrchestrator, SyncTask};
pub use sync::{SyncEngine, SyncOutcome};
