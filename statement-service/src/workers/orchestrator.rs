//! Worker pool and scheduler for the three pipeline queues.
//!
//! Sync, detection and delivery tasks flow through independent bounded
//! channels, each drained by its own small worker pool. A scheduler loop
//! ticks on a fixed interval and enqueues due work. Re-enqueueing the same
//! entity across ticks is harmless: sync and detection are idempotent, and
//! the delivery row lease lets exactly one worker through.

use crate::config::WorkerConfig;
use crate::services::store::StatementStore;
use crate::workers::backfill;
use crate::workers::deliverer::DeliveryEngine;
use crate::workers::detector::{DetectionTask, StatementDetector};
use crate::workers::sync::SyncEngine;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SyncTask {
    pub connection_id: String,
}

#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub delivery_id: String,
}

/// Senders handed to the HTTP layer for on-demand work.
#[derive(Clone)]
pub struct PipelineHandles {
    pub sync_tx: mpsc::Sender<SyncTask>,
    pub detect_tx: mpsc::Sender<DetectionTask>,
    pub delivery_tx: mpsc::Sender<DeliveryTask>,
}

pub struct PipelineOrchestrator {
    config: WorkerConfig,
    store: Arc<dyn StatementStore>,
    sync_engine: Arc<SyncEngine>,
    detector: Arc<StatementDetector>,
    delivery_engine: Arc<DeliveryEngine>,
    handles: PipelineHandles,
    sync_rx: Option<mpsc::Receiver<SyncTask>>,
    detect_rx: Option<mpsc::Receiver<DetectionTask>>,
    delivery_rx: Option<mpsc::Receiver<DeliveryTask>>,
    shutdown_token: CancellationToken,
}

impl PipelineOrchestrator {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn StatementStore>,
        sync_engine: Arc<SyncEngine>,
        detector: Arc<StatementDetector>,
        delivery_engine: Arc<DeliveryEngine>,
    ) -> (Self, PipelineHandles) {
        let (sync_tx, sync_rx) = mpsc::channel(config.queue_size);
        let (detect_tx, detect_rx) = mpsc::channel(config.queue_size);
        let (delivery_tx, delivery_rx) = mpsc::channel(config.queue_size);

        let handles = PipelineHandles {
            sync_tx,
            detect_tx,
            delivery_tx,
        };

        let orchestrator = Self {
            config,
            store,
            sync_engine,
            detector,
            delivery_engine,
            handles: handles.clone(),
            sync_rx: Some(sync_rx),
            detect_rx: Some(detect_rx),
            delivery_rx: Some(delivery_rx),
            shutdown_token: CancellationToken::new(),
        };

        (orchestrator, handles)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn start(mut self) {
        if !self.config.enabled {
            tracing::info!("Worker pool disabled by configuration");
            return;
        }

        tracing::info!(
            sync_workers = self.config.sync_workers,
            detect_workers = self.config.detect_workers,
            delivery_workers = self.config.delivery_workers,
            "Starting pipeline worker pools"
        );

        let sync_rx = self.sync_rx.take().expect("start() can only be called once");
        let detect_rx = self.detect_rx.take().expect("start() can only be called once");
        let delivery_rx = self
            .delivery_rx
            .take()
            .expect("start() can only be called once");

        self.spawn_sync_pool(sync_rx);
        self.spawn_detect_pool(detect_rx);
        self.spawn_delivery_pool(delivery_rx);
        self.spawn_scheduler();
    }

    fn spawn_sync_pool(&self, mut rx: mpsc::Receiver<SyncTask>) {
        let engine = self.sync_engine.clone();
        let shutdown = self.shutdown_token.clone();
        let workers = self.config.sync_workers.max(1);
        let semaphore = Arc::new(tokio::sync::Semaphore::new(workers));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    task = rx.recv() => {
                        let Some(task) = task else { break };
                        let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
                        let engine = engine.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            if let Err(e) = engine.sync_connection(&task.connection_id).await {
                                tracing::warn!(
                                    connection_id = %task.connection_id,
                                    error = %e,
                                    "Connection sync failed"
                                );
                            }
                        });
                    }
                }
            }
            tracing::info!("Sync pool shut down");
        });
    }

    fn spawn_detect_pool(&self, mut rx: mpsc::Receiver<DetectionTask>) {
        let detector = self.detector.clone();
        let store = self.store.clone();
        let delivery_tx = self.handles.delivery_tx.clone();
        let shutdown = self.shutdown_token.clone();
        let workers = self.config.detect_workers.max(1);
        let semaphore = Arc::new(tokio::sync::Semaphore::new(workers));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    task = rx.recv() => {
                        let Some(task) = task else { break };
                        let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
                        let detector = detector.clone();
                        let store = store.clone();
                        let delivery_tx = delivery_tx.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            let result = detector.detect(&task).await;

                            match &result {
                                Ok(outcome) => {
                                    for delivery in &outcome.deliveries {
                                        let send = delivery_tx
                                            .try_send(DeliveryTask { delivery_id: delivery.id.clone() });
                                        if send.is_err() {
                                            // Queue full; the scheduler picks the
                                            // pending row up on a later tick.
                                            tracing::warn!(
                                                delivery_id = %delivery.id,
                                                "Delivery queue full, deferring to scheduler"
                                            );
                                        }
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        account_id = %task.account_id,
                                        error = %e,
                                        "Statement detection failed"
                                    );
                                }
                            }

                            if let Some(job_id) = &task.backfill_job_id {
                                if let Err(e) = backfill::note_detection(&store, job_id, &result).await {
                                    tracing::error!(
                                        job_id = %job_id,
                                        error = %e,
                                        "Failed to record backfill progress"
                                    );
                                }
                            }
                        });
                    }
                }
            }
            tracing::info!("Detection pool shut down");
        });
    }

    fn spawn_delivery_pool(&self, mut rx: mpsc::Receiver<DeliveryTask>) {
        let engine = self.delivery_engine.clone();
        let shutdown = self.shutdown_token.clone();
        let workers = self.config.delivery_workers.max(1);
        let semaphore = Arc::new(tokio::sync::Semaphore::new(workers));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    task = rx.recv() => {
                        let Some(task) = task else { break };
                        let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
                        let engine = engine.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            if let Err(e) = engine.deliver(&task.delivery_id).await {
                                tracing::warn!(
                                    delivery_id = %task.delivery_id,
                                    error = %e,
                                    "Delivery attempt errored"
                                );
                            }
                        });
                    }
                }
            }
            tracing::info!("Delivery pool shut down");
        });
    }

    /// Periodic scan for due work: connections past their sync interval,
    /// accounts past their detection interval, and pending deliveries whose
    /// backoff has elapsed.
    fn spawn_scheduler(&self) {
        let store = self.store.clone();
        let handles = self.handles.clone();
        let shutdown = self.shutdown_token.clone();
        let poll_interval = self.config.poll_interval();
        let sync_every = ChronoDuration::seconds(self.config.sync_interval_secs as i64);
        let detect_every = ChronoDuration::seconds(self.config.detect_interval_secs as i64);
        let delivery_batch = self.config.delivery_batch;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let now = Utc::now();

                match store.list_syncable_connections().await {
                    Ok(connections) => {
                        for connection in connections {
                            let due = connection
                                .last_sync
                                .map_or(true, |at| now - at >= sync_every);
                            if !due {
                                continue;
                            }
                            let _ = handles.sync_tx.try_send(SyncTask {
                                connection_id: connection.id.clone(),
                            });

                            match store.list_accounts_for_connection(&connection.id).await {
                                Ok(accounts) => {
                                    for account in accounts {
                                        let due = account.is_detectable()
                                            && account
                                                .last_statement_check
                                                .map_or(true, |at| now - at >= detect_every);
                                        if due {
                                            let _ = handles
                                                .detect_tx
                                                .try_send(DetectionTask::poll(account.id));
                                        }
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "Scheduler failed to list accounts")
                                }
                            }
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Scheduler failed to list connections"),
                }

                match store.due_deliveries(now, delivery_batch).await {
                    Ok(due) => {
                        for delivery in due {
                            let _ = handles
                                .delivery_tx
                                .try_send(DeliveryTask { delivery_id: delivery.id });
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Scheduler failed to list due deliveries"),
                }
            }
            tracing::info!("Scheduler shut down");
        });
    }
}
