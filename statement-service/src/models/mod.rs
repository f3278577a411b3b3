pub mod account;
pub mod backfill;
pub mod connection;
pub mod delivery;
pub mod destination;
pub mod routing_rule;
pub mod statement;

pub use account::{Account, AccountStatus};
pub use backfill::{BackfillJob, BackfillStatus, MAX_BACKFILL_MONTHS};
pub use connection::{Connection, ConnectionStatus};
pub use delivery::{Delivery, DeliveryStatus, MAX_DELIVERY_ATTEMPTS};
pub use destination::{Destination, DestinationKind, DestinationStatus};
pub use routing_rule::RoutingRule;
pub use statement::{Statement, StatementFileType};
