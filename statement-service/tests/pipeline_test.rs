//! Engine-level pipeline tests: detection versioning, routing fan-out and
//! the delivery lease/retry machinery, against the in-memory store and the
//! sandbox aggregator.

mod common;

use chrono::{Duration, Utc};
use common::{harness, recent_period, upstream_statement};
use service_core::utils::signature::verify_payload;
use statement_service::models::{AccountStatus, BackfillStatus, DeliveryStatus, MAX_DELIVERY_ATTEMPTS};
use statement_service::workers::{backfill, DeliveryOutcome, DetectionSkip, DetectionTask};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn detection_is_idempotent_across_runs() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;

    let (start, end) = recent_period();
    h.sandbox
        .push_statement(&account.upstream_account_id, upstream_statement("s1", &start, &end));

    let first = h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    assert_eq!(first.new_statements.len(), 1);
    assert_eq!(first.new_statements[0].version, 1);

    let second = h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    assert!(second.new_statements.is_empty(), "identical checksum must not re-ingest");

    let stored = h.store.list_statements(&account.id).await.unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn changed_checksum_creates_next_version() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;

    let (start, end) = recent_period();
    h.sandbox
        .push_statement(&account.upstream_account_id, upstream_statement("s1", &start, &end));
    h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();

    // Upstream corrects the statement: same period, different content.
    let mut corrected = upstream_statement("s1", &start, &end);
    corrected.content_hash = Some("hash-corrected".to_string());
    h.sandbox.push_statement(&account.upstream_account_id, corrected);

    let outcome = h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    assert_eq!(outcome.new_statements.len(), 1);
    assert_eq!(outcome.new_statements[0].version, 2);

    let stored = h.store.list_statements(&account.id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].version, 2);
}

#[tokio::test]
async fn backfill_window_does_not_advance_poll_cursor() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;

    let job = statement_service::models::BackfillJob::new(
        account.org_id.clone(),
        account.id.clone(),
        Utc::now().date_naive() - Duration::days(90),
        Utc::now().date_naive() - Duration::days(30),
    )
    .unwrap();
    h.store.insert_backfill_job(job.clone()).await.unwrap();

    let window = job.periods()[0];
    h.detector
        .detect(&DetectionTask::backfill(account.id.clone(), window, job.id.clone()))
        .await
        .unwrap();

    let refreshed = h.store.get_account(&account.id).await.unwrap().unwrap();
    assert!(refreshed.last_statement_check.is_none());

    // A regular poll does advance it.
    h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    let refreshed = h.store.get_account(&account.id).await.unwrap().unwrap();
    assert!(refreshed.last_statement_check.is_some());
}

#[tokio::test]
async fn every_active_rule_yields_one_delivery() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;

    let webhook = h.seed_webhook_destination("org-1", "http://unused").await;
    let dropbox = h.seed_dropbox_destination("org-1", "http://unused").await;
    h.seed_rule(&account, &webhook).await;
    h.seed_rule(&account, &dropbox).await;

    let inactive_rule = h.seed_rule(&account, &webhook).await;
    h.store
        .set_routing_rule_active(&inactive_rule.id, false)
        .await
        .unwrap();

    let (start, end) = recent_period();
    h.sandbox
        .push_statement(&account.upstream_account_id, upstream_statement("s1", &start, &end));

    let outcome = h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    assert_eq!(outcome.new_statements.len(), 1);
    assert_eq!(outcome.deliveries.len(), 2, "inactive rules must not fan out");

    let rows = h
        .store
        .list_deliveries_for_statement(&outcome.new_statements[0].id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|d| d.status == DeliveryStatus::Pending));
}

#[tokio::test]
async fn no_rules_means_detected_but_undelivered() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;

    let (start, end) = recent_period();
    h.sandbox
        .push_statement(&account.upstream_account_id, upstream_statement("s1", &start, &end));

    let outcome = h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    assert_eq!(outcome.new_statements.len(), 1);
    assert!(outcome.deliveries.is_empty());
}

#[tokio::test]
async fn webhook_delivery_is_signed_and_succeeds() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists("X-Signature"))
        .and(header_exists("X-Request-Id"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let destination = h.seed_webhook_destination("org-1", &server.uri()).await;
    h.seed_rule(&account, &destination).await;

    let (start, end) = recent_period();
    h.sandbox
        .push_statement(&account.upstream_account_id, upstream_statement("s1", &start, &end));
    let outcome = h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    let delivery_id = outcome.deliveries[0].id.clone();

    let result = h.deliverer.deliver(&delivery_id).await.unwrap();
    assert_eq!(result, DeliveryOutcome::Delivered);

    let row = h.store.get_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(row.status, DeliveryStatus::Succeeded);
    assert_eq!(row.attempts, 1);
    assert!(row.delivered_at.is_some());

    // The signature must verify against the exact body that was sent.
    let received = server.received_requests().await.unwrap();
    let request = &received[0];
    let signature = request.headers.get("X-Signature").unwrap().to_str().unwrap();
    assert!(verify_payload("whsec_test", &request.body, signature));
}

#[tokio::test]
async fn cloud_delivery_records_storage_path() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2/files/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "path_display": "/Statements/First Platypus Bank-0000-2024-05-31.pdf",
            "size": 4096,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let destination = h.seed_dropbox_destination("org-1", &server.uri()).await;
    h.seed_rule(&account, &destination).await;

    let (start, end) = recent_period();
    h.sandbox
        .push_statement(&account.upstream_account_id, upstream_statement("s1", &start, &end));
    let outcome = h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    let delivery_id = outcome.deliveries[0].id.clone();

    let result = h.deliverer.deliver(&delivery_id).await.unwrap();
    assert_eq!(result, DeliveryOutcome::Delivered);

    let row = h.store.get_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(row.status, DeliveryStatus::Succeeded);
    assert!(row.storage_path.as_deref().unwrap().starts_with("/Statements/"));
    assert_eq!(row.storage_size, Some(4096));
}

#[tokio::test]
async fn failed_attempt_backs_off_and_stays_pending() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let destination = h.seed_webhook_destination("org-1", &server.uri()).await;
    h.seed_rule(&account, &destination).await;

    let (start, end) = recent_period();
    h.sandbox
        .push_statement(&account.upstream_account_id, upstream_statement("s1", &start, &end));
    let outcome = h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    let delivery_id = outcome.deliveries[0].id.clone();

    let result = h.deliverer.deliver(&delivery_id).await.unwrap();
    assert_eq!(result, DeliveryOutcome::Retrying { attempt: 1 });

    let row = h.store.get_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(row.status, DeliveryStatus::Pending);
    assert_eq!(row.attempts, 1);
    assert!(row.error_message.is_some());
    assert!(row.next_attempt_at.unwrap() > Utc::now());

    // Not due yet, so another worker picking it up is a no-op.
    let again = h.deliverer.deliver(&delivery_id).await.unwrap();
    assert_eq!(again, DeliveryOutcome::AlreadyClaimed);
}

#[tokio::test]
async fn retry_budget_exhausts_terminally() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let destination = h.seed_webhook_destination("org-1", &server.uri()).await;
    h.seed_rule(&account, &destination).await;

    let (start, end) = recent_period();
    h.sandbox
        .push_statement(&account.upstream_account_id, upstream_statement("s1", &start, &end));
    let outcome = h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    let delivery_id = outcome.deliveries[0].id.clone();

    // Burn through the first four attempts by expiring the backoff manually.
    for _ in 0..(MAX_DELIVERY_ATTEMPTS - 1) {
        let claimed = h
            .store
            .claim_delivery(&delivery_id, Utc::now() + Duration::hours(2))
            .await
            .unwrap();
        assert!(claimed.is_some());
        h.store
            .fail_delivery(&delivery_id, "upstream 500".to_string(), Some(Utc::now() - Duration::seconds(1)))
            .await
            .unwrap();
    }

    let result = h.deliverer.deliver(&delivery_id).await.unwrap();
    assert_eq!(result, DeliveryOutcome::Exhausted);

    let row = h.store.get_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(row.status, DeliveryStatus::Failed);
    assert_eq!(row.attempts, MAX_DELIVERY_ATTEMPTS);
    assert!(row.next_attempt_at.is_none());

    // A terminal row is never attempted again without a manual reset.
    let again = h.deliverer.deliver(&delivery_id).await.unwrap();
    assert_eq!(again, DeliveryOutcome::AlreadyClaimed);
    let row = h.store.get_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(row.attempts, MAX_DELIVERY_ATTEMPTS);
}

#[tokio::test]
async fn claim_admits_exactly_one_worker() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;
    let destination = h.seed_webhook_destination("org-1", "http://unused").await;
    h.seed_rule(&account, &destination).await;

    let (start, end) = recent_period();
    h.sandbox
        .push_statement(&account.upstream_account_id, upstream_statement("s1", &start, &end));
    let outcome = h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    let delivery_id = outcome.deliveries[0].id.clone();

    let now = Utc::now();
    let first = h.store.claim_delivery(&delivery_id, now).await.unwrap();
    let second = h.store.claim_delivery(&delivery_id, now).await.unwrap();
    assert!(first.is_some());
    assert!(second.is_none(), "second claimant must lose the lease");
}

#[tokio::test]
async fn manual_reset_requeues_a_failed_delivery() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let destination = h.seed_webhook_destination("org-1", &server.uri()).await;
    h.seed_rule(&account, &destination).await;

    let (start, end) = recent_period();
    h.sandbox
        .push_statement(&account.upstream_account_id, upstream_statement("s1", &start, &end));
    let outcome = h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    let delivery_id = outcome.deliveries[0].id.clone();

    // Resetting a non-failed row is a conflict.
    assert!(h.store.reset_delivery(&delivery_id).await.is_err());

    h.store
        .claim_delivery(&delivery_id, Utc::now())
        .await
        .unwrap();
    h.store
        .fail_delivery(&delivery_id, "boom".to_string(), None)
        .await
        .unwrap();

    let reset = h.store.reset_delivery(&delivery_id).await.unwrap();
    assert_eq!(reset.status, DeliveryStatus::Pending);
    assert_eq!(reset.attempts, 0);

    let result = h.deliverer.deliver(&delivery_id).await.unwrap();
    assert_eq!(result, DeliveryOutcome::Delivered);
}

#[tokio::test]
async fn expired_credentials_flag_connection_for_relink() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    h.seed_account(&connection).await;

    h.sandbox.expire_token("access-sandbox-test");

    let outcome = h.sync.sync_connection(&connection.id).await.unwrap();
    assert_eq!(outcome, statement_service::workers::SyncOutcome::ReauthRequired);

    let refreshed = h.store.get_connection(&connection.id).await.unwrap().unwrap();
    assert_eq!(
        refreshed.status,
        statement_service::models::ConnectionStatus::ReauthRequired
    );

    // Statement checks stop while the connection awaits relink.
    let account = h
        .store
        .list_accounts_for_connection(&connection.id)
        .await
        .unwrap()
        .remove(0);
    let detection = h
        .detector
        .detect(&DetectionTask::poll(account.id))
        .await
        .unwrap();
    assert_eq!(detection.skipped, Some(DetectionSkip::Ineligible));
}

#[tokio::test]
async fn backfill_over_paused_account_still_reaches_a_terminal_status() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;
    h.store
        .update_account_status(&account.id, AccountStatus::Paused)
        .await
        .unwrap();

    let (job, tasks) = backfill::start_backfill(
        &h.store,
        "org-1",
        &account.id,
        Utc::now().date_naive() - Duration::days(90),
        Utc::now().date_naive(),
    )
    .await
    .unwrap();

    // Every month task runs against the paused account and must be counted
    // as failed rather than silently dropped.
    for task in &tasks {
        let result = h.detector.detect(task).await;
        backfill::note_detection(&h.store, &job.id, &result)
            .await
            .unwrap();
    }

    let refreshed = h.store.get_backfill_job(&job.id).await.unwrap().unwrap();
    assert!(
        refreshed.is_terminal(),
        "job must not stall in progress, got {:?} with {}/{} months recorded",
        refreshed.status,
        refreshed.months_done + refreshed.months_failed,
        refreshed.months_total
    );
    assert_eq!(refreshed.status, BackfillStatus::Failed);
    assert_eq!(refreshed.months_failed, refreshed.months_total);

    // Once the job is terminal a straggling month task records nothing.
    let extra = h.detector.detect(&tasks[0]).await;
    assert!(matches!(&extra, Ok(o) if o.skipped == Some(DetectionSkip::JobTerminal)));
    let noted = backfill::note_detection(&h.store, &job.id, &extra).await.unwrap();
    assert!(noted.is_none());
    let after = h.store.get_backfill_job(&job.id).await.unwrap().unwrap();
    assert_eq!(after.months_failed, refreshed.months_failed);
}

#[tokio::test]
async fn racing_claims_admit_exactly_one_worker() {
    let h = harness();
    let connection = h.seed_connection("org-1").await;
    let account = h.seed_account(&connection).await;
    let destination = h.seed_webhook_destination("org-1", "http://unused").await;
    h.seed_rule(&account, &destination).await;

    let (start, end) = recent_period();
    h.sandbox
        .push_statement(&account.upstream_account_id, upstream_statement("s1", &start, &end));
    let outcome = h.detector.detect(&DetectionTask::poll(account.id.clone())).await.unwrap();
    let delivery_id = outcome.deliveries[0].id.clone();

    let now = Utc::now();
    let mut claimants = Vec::new();
    for _ in 0..8 {
        let store = h.store.clone();
        let id = delivery_id.clone();
        claimants.push(tokio::spawn(async move {
            store.claim_delivery(&id, now).await.unwrap()
        }));
    }

    let mut wins = 0;
    for claimant in claimants {
        if claimant.await.unwrap().is_some() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1, "concurrent claimants must resolve to a single lease");

    let row = h.store.get_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(row.status, DeliveryStatus::InProgress);
    assert_eq!(row.attempts, 1);
}
