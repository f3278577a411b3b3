pub mod accounts;
pub mod backfill;
pub mod deliveries;
pub mod destinations;
pub mod health;
pub mod link;
pub mod notifications;
pub mod routes;
pub mod statements;
pub mod webhooks;
