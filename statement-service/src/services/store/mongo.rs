//! MongoDB-backed [`StatementStore`].
//!
//! The delivery claim uses an attempts-based compare-and-swap on top of a
//! conditional `pending -> in_progress` update, so exactly one worker wins
//! even when several race on the same row.

use super::StatementStore;
use crate::models::{
    Account, AccountStatus, BackfillJob, BackfillStatus, Connection, ConnectionStatus, Delivery,
    DeliveryStatus, Destination, DestinationStatus, RoutingRule, Statement,
};
use crate::services::database::MongoDb;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use service_core::error::AppError;

#[derive(Clone)]
pub struct MongoStore {
    db: MongoDb,
}

impl MongoStore {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }

    fn bson_now(at: DateTime<Utc>) -> Bson {
        Bson::DateTime(mongodb::bson::DateTime::from_chrono(at))
    }
}

fn status_bson<T: serde::Serialize>(status: &T) -> Result<Bson, AppError> {
    to_bson(status).map_err(|e| AppError::InternalError(anyhow::anyhow!("bson encode: {}", e)))
}

#[async_trait]
impl StatementStore for MongoStore {
    async fn insert_connection(&self, connection: Connection) -> Result<(), AppError> {
        self.db.connections().insert_one(connection, None).await?;
        Ok(())
    }

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>, AppError> {
        Ok(self.db.connections().find_one(doc! { "_id": id }, None).await?)
    }

    async fn get_connection_by_item(
        &self,
        item_id: &str,
    ) -> Result<Option<Connection>, AppError> {
        Ok(self
            .db
            .connections()
            .find_one(doc! { "item_id": item_id }, None)
            .await?)
    }

    async fn list_connections(&self, org_id: &str) -> Result<Vec<Connection>, AppError> {
        let cursor = self
            .db
            .connections()
            .find(doc! { "org_id": org_id }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn list_syncable_connections(&self) -> Result<Vec<Connection>, AppError> {
        let cursor = self
            .db
            .connections()
            .find(doc! { "status": { "$in": ["active", "error"] } }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_connection_status(
        &self,
        id: &str,
        status: ConnectionStatus,
        error_message: Option<String>,
    ) -> Result<(), AppError> {
        let update = doc! {
            "$set": {
                "status": status_bson(&status)?,
                "error_message": error_message.map(Bson::String).unwrap_or(Bson::Null),
                "updated_at": Self::bson_now(Utc::now()),
            }
        };
        self.db
            .connections()
            .update_one(doc! { "_id": id }, update, None)
            .await?;
        Ok(())
    }

    async fn mark_connection_synced(&self, id: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        let update = doc! {
            "$set": {
                "last_sync": status_bson(&Some(at))?,
                "updated_at": Self::bson_now(at),
            }
        };
        self.db
            .connections()
            .update_one(doc! { "_id": id }, update, None)
            .await?;
        Ok(())
    }

    async fn delete_connection(&self, id: &str) -> Result<(), AppError> {
        self.db
            .connections()
            .delete_one(doc! { "_id": id }, None)
            .await?;
        Ok(())
    }

    async fn upsert_account(&self, account: Account) -> Result<Account, AppError> {
        let filter = doc! {
            "connection_id": &account.connection_id,
            "upstream_account_id": &account.upstream_account_id,
        };
        if let Some(existing) = self.db.accounts().find_one(filter.clone(), None).await? {
            let update = doc! {
                "$set": {
                    "name": &account.name,
                    "mask": &account.mask,
                    "account_type": &account.account_type,
                    "subtype": account.subtype.clone().map(Bson::String).unwrap_or(Bson::Null),
                    "statements_supported": account.statements_supported,
                    "updated_at": Self::bson_now(Utc::now()),
                }
            };
            self.db.accounts().update_one(filter, update, None).await?;
            let refreshed = self
                .db
                .accounts()
                .find_one(doc! { "_id": &existing.id }, None)
                .await?
                .ok_or_else(|| {
                    AppError::DatabaseError(anyhow::anyhow!("account vanished during upsert"))
                })?;
            Ok(refreshed)
        } else {
            self.db.accounts().insert_one(account.clone(), None).await?;
            Ok(account)
        }
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>, AppError> {
        Ok(self.db.accounts().find_one(doc! { "_id": id }, None).await?)
    }

    async fn list_accounts(&self, org_id: &str) -> Result<Vec<Account>, AppError> {
        let cursor = self
            .db
            .accounts()
            .find(doc! { "org_id": org_id }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn list_accounts_for_connection(
        &self,
        connection_id: &str,
    ) -> Result<Vec<Account>, AppError> {
        let cursor = self
            .db
            .accounts()
            .find(doc! { "connection_id": connection_id }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_account_status(
        &self,
        id: &str,
        status: AccountStatus,
    ) -> Result<(), AppError> {
        let update = doc! {
            "$set": {
                "status": status_bson(&status)?,
                "updated_at": Self::bson_now(Utc::now()),
            }
        };
        self.db
            .accounts()
            .update_one(doc! { "_id": id }, update, None)
            .await?;
        Ok(())
    }

    async fn mark_statement_check(&self, id: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        let update = doc! {
            "$set": {
                "last_statement_check": status_bson(&Some(at))?,
                "updated_at": Self::bson_now(at),
            }
        };
        self.db
            .accounts()
            .update_one(doc! { "_id": id }, update, None)
            .await?;
        Ok(())
    }

    async fn latest_statement_for_period(
        &self,
        account_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Option<Statement>, AppError> {
        let filter = doc! {
            "account_id": account_id,
            "period_start": period_start.to_string(),
            "period_end": period_end.to_string(),
        };
        let options = FindOptions::builder()
            .sort(doc! { "version": -1 })
            .limit(1)
            .build();
        let mut cursor = self.db.statements().find(filter, options).await?;
        Ok(cursor.try_next().await?)
    }

    async fn insert_statement(&self, statement: Statement) -> Result<(), AppError> {
        // The unique (account_id, period_start, period_end, version) index
        // turns a duplicate insert into a driver error.
        self.db
            .statements()
            .insert_one(statement, None)
            .await
            .map_err(|e| AppError::Conflict(anyhow::anyhow!("statement insert: {}", e)))?;
        Ok(())
    }

    async fn get_statement(&self, id: &str) -> Result<Option<Statement>, AppError> {
        Ok(self.db.statements().find_one(doc! { "_id": id }, None).await?)
    }

    async fn list_statements(&self, account_id: &str) -> Result<Vec<Statement>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "period_end": -1, "version": -1 })
            .build();
        let cursor = self
            .db
            .statements()
            .find(doc! { "account_id": account_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_destination(&self, destination: Destination) -> Result<(), AppError> {
        self.db.destinations().insert_one(destination, None).await?;
        Ok(())
    }

    async fn get_destination(&self, id: &str) -> Result<Option<Destination>, AppError> {
        Ok(self
            .db
            .destinations()
            .find_one(doc! { "_id": id }, None)
            .await?)
    }

    async fn list_destinations(&self, org_id: &str) -> Result<Vec<Destination>, AppError> {
        let cursor = self
            .db
            .destinations()
            .find(doc! { "org_id": org_id }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_destination_status(
        &self,
        id: &str,
        status: DestinationStatus,
    ) -> Result<(), AppError> {
        let update = doc! {
            "$set": {
                "status": status_bson(&status)?,
                "updated_at": Self::bson_now(Utc::now()),
            }
        };
        self.db
            .destinations()
            .update_one(doc! { "_id": id }, update, None)
            .await?;
        Ok(())
    }

    async fn insert_routing_rule(&self, rule: RoutingRule) -> Result<(), AppError> {
        self.db.routing_rules().insert_one(rule, None).await?;
        Ok(())
    }

    async fn get_routing_rule(&self, id: &str) -> Result<Option<RoutingRule>, AppError> {
        Ok(self
            .db
            .routing_rules()
            .find_one(doc! { "_id": id }, None)
            .await?)
    }

    async fn list_routing_rules(&self, org_id: &str) -> Result<Vec<RoutingRule>, AppError> {
        let cursor = self
            .db
            .routing_rules()
            .find(doc! { "org_id": org_id }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn active_rules_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<RoutingRule>, AppError> {
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        let cursor = self
            .db
            .routing_rules()
            .find(doc! { "account_id": account_id, "active": true }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn set_routing_rule_active(&self, id: &str, active: bool) -> Result<(), AppError> {
        let update = doc! {
            "$set": { "active": active, "updated_at": Self::bson_now(Utc::now()) }
        };
        self.db
            .routing_rules()
            .update_one(doc! { "_id": id }, update, None)
            .await?;
        Ok(())
    }

    async fn insert_delivery(&self, delivery: Delivery) -> Result<(), AppError> {
        self.db.deliveries().insert_one(delivery, None).await?;
        Ok(())
    }

    async fn get_delivery(&self, id: &str) -> Result<Option<Delivery>, AppError> {
        Ok(self.db.deliveries().find_one(doc! { "_id": id }, None).await?)
    }

    async fn list_deliveries_for_statement(
        &self,
        statement_id: &str,
    ) -> Result<Vec<Delivery>, AppError> {
        let cursor = self
            .db
            .deliveries()
            .find(doc! { "statement_id": statement_id }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn claim_delivery(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>, AppError> {
        let Some(current) = self.get_delivery(id).await? else {
            return Err(AppError::NotFound(anyhow::anyhow!("delivery {} not found", id)));
        };
        if !current.is_due(now) {
            return Ok(None);
        }

        // Compare-and-swap on the observed attempt counter; a concurrent
        // claimer changes it and this filter then matches nothing.
        let filter = doc! {
            "_id": id,
            "status": status_bson(&DeliveryStatus::Pending)?,
            "attempts": current.attempts as i64,
        };
        let update = doc! {
            "$set": {
                "status": status_bson(&DeliveryStatus::InProgress)?,
                "next_attempt_at": Bson::Null,
                "updated_at": Self::bson_now(now),
            },
            "$inc": { "attempts": 1 },
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .db
            .deliveries()
            .find_one_and_update(filter, update, options)
            .await?)
    }

    async fn complete_delivery(
        &self,
        id: &str,
        delivered_at: DateTime<Utc>,
        storage_path: Option<String>,
        storage_size: Option<u64>,
    ) -> Result<(), AppError> {
        let update = doc! {
            "$set": {
                "status": status_bson(&DeliveryStatus::Succeeded)?,
                "delivered_at": status_bson(&Some(delivered_at))?,
                "error_message": Bson::Null,
                "storage_path": storage_path.map(Bson::String).unwrap_or(Bson::Null),
                "storage_size": storage_size.map(|s| Bson::Int64(s as i64)).unwrap_or(Bson::Null),
                "updated_at": Self::bson_now(delivered_at),
            }
        };
        self.db
            .deliveries()
            .update_one(doc! { "_id": id }, update, None)
            .await?;
        Ok(())
    }

    async fn fail_delivery(
        &self,
        id: &str,
        error_message: String,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let (status, next) = match next_attempt_at {
            Some(at) => (DeliveryStatus::Pending, Self::bson_now(at)),
            None => (DeliveryStatus::Failed, Bson::Null),
        };
        let update = doc! {
            "$set": {
                "status": status_bson(&status)?,
                "error_message": error_message,
                "next_attempt_at": next,
                "updated_at": Self::bson_now(Utc::now()),
            }
        };
        self.db
            .deliveries()
            .update_one(doc! { "_id": id }, update, None)
            .await?;
        Ok(())
    }

    async fn reset_delivery(&self, id: &str) -> Result<Delivery, AppError> {
        let filter = doc! {
            "_id": id,
            "status": status_bson(&DeliveryStatus::Failed)?,
        };
        let update = doc! {
            "$set": {
                "status": status_bson(&DeliveryStatus::Pending)?,
                "attempts": 0,
                "error_message": Bson::Null,
                "next_attempt_at": Self::bson_now(Utc::now()),
                "updated_at": Self::bson_now(Utc::now()),
            }
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        self.db
            .deliveries()
            .find_one_and_update(filter, update, options)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!("delivery {} is not in failed state", id))
            })
    }

    async fn due_deliveries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Delivery>, AppError> {
        let filter = doc! {
            "status": status_bson(&DeliveryStatus::Pending)?,
            "$or": [
                { "next_attempt_at": Bson::Null },
                { "next_attempt_at": { "$lte": Self::bson_now(now) } },
            ],
        };
        let options = FindOptions::builder()
            .sort(doc! { "next_attempt_at": 1 })
            .limit(limit as i64)
            .build();
        let cursor = self.db.deliveries().find(filter, options).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_backfill_job(&self, job: BackfillJob) -> Result<(), AppError> {
        self.db.backfill_jobs().insert_one(job, None).await?;
        Ok(())
    }

    async fn get_backfill_job(&self, id: &str) -> Result<Option<BackfillJob>, AppError> {
        Ok(self
            .db
            .backfill_jobs()
            .find_one(doc! { "_id": id }, None)
            .await?)
    }

    async fn update_backfill_status(
        &self,
        id: &str,
        status: BackfillStatus,
        error_message: Option<String>,
    ) -> Result<(), AppError> {
        let update = doc! {
            "$set": {
                "status": status_bson(&status)?,
                "error_message": error_message.map(Bson::String).unwrap_or(Bson::Null),
                "updated_at": Self::bson_now(Utc::now()),
            }
        };
        self.db
            .backfill_jobs()
            .update_one(doc! { "_id": id }, update, None)
            .await?;
        Ok(())
    }

    async fn record_backfill_month(&self, id: &str, ok: bool) -> Result<BackfillJob, AppError> {
        let counter = if ok { "months_done" } else { "months_failed" };
        let update = doc! {
            "$inc": { counter: 1 },
            "$set": { "updated_at": Self::bson_now(Utc::now()) },
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        self.db
            .backfill_jobs()
            .find_one_and_update(doc! { "_id": id }, update, options)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("backfill job {} not found", id)))
    }

    async fn put_notification_prefs(
        &self,
        org_id: &str,
        account_id: &str,
        prefs: serde_json::Value,
    ) -> Result<(), AppError> {
        let prefs_bson = to_bson(&prefs)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("bson encode: {}", e)))?;
        let update = doc! {
            "$set": {
                "org_id": org_id,
                "account_id": account_id,
                "prefs": prefs_bson,
                "updated_at": Self::bson_now(Utc::now()),
            }
        };
        self.db
            .database()
            .collection::<mongodb::bson::Document>("notification_prefs")
            .update_one(
                doc! { "org_id": org_id, "account_id": account_id },
                update,
                mongodb::options::UpdateOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }
}
