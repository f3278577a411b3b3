//! HTTP surface tests against a full application instance backed by the
//! in-memory store and the sandbox aggregator.

mod common;

use common::{upstream_statement, TestApp, AGGREGATOR_SECRET};
use reqwest::StatusCode;
use service_core::utils::signature::sign_payload;
use statement_service::services::aggregator::UpstreamAccount;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const ORG: &str = "org-test";

async fn link(app: &TestApp) -> serde_json::Value {
    let response = app
        .client
        .post(app.url("/api/plaid/exchange_public_token"))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({ "public_token": "public-sandbox-abc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    response.json().await.unwrap()
}

#[tokio::test]
async fn health_ready_and_metrics_respond() {
    let app = TestApp::spawn().await;

    for path in ["/health", "/ready", "/metrics"] {
        let response = app.client.get(app.url(path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", path);
    }
}

#[tokio::test]
async fn api_requires_org_header() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/api/accounts"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn link_flow_creates_connection_and_accounts() {
    let app = TestApp::spawn().await;

    let token = app
        .client
        .post(app.url("/api/plaid/link_token"))
        .header("X-Org-ID", ORG)
        .send()
        .await
        .unwrap();
    assert_eq!(token.status(), StatusCode::OK);
    let token: serde_json::Value = token.json().await.unwrap();
    assert!(token["link_token"].as_str().unwrap().starts_with("link-sandbox-"));

    let exchange = link(&app).await;
    assert_eq!(exchange["connection"]["institution_name"], "First Platypus Bank");
    assert_eq!(exchange["connection"]["status"], "active");
    let accounts = exchange["accounts"].as_array().unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["mask"], "0000");

    // The raw access token must never appear in stored state.
    let connections = app.store.list_connections(ORG).await.unwrap();
    assert_eq!(connections.len(), 1);
    assert!(!connections[0].access_token_enc.contains("access-sandbox"));

    // Other orgs see nothing.
    let foreign = app
        .client
        .get(app.url("/api/accounts"))
        .header("X-Org-ID", "someone-else")
        .send()
        .await
        .unwrap();
    let foreign: Vec<serde_json::Value> = foreign.json().await.unwrap();
    assert!(foreign.is_empty());
}

#[tokio::test]
async fn link_backfill_covers_every_detectable_account() {
    let app = TestApp::spawn().await;

    // The item resolves to two statement-capable accounts.
    app.sandbox.push_account(
        "access-sandbox-multi",
        UpstreamAccount {
            account_id: "acct-sandbox-multi-savings".to_string(),
            name: "Plaid Savings".to_string(),
            mask: "1111".to_string(),
            account_type: "depository".to_string(),
            subtype: Some("savings".to_string()),
            statements_supported: true,
        },
    );

    let response = app
        .client
        .post(app.url("/api/plaid/exchange_public_token"))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({
            "public_token": "public-sandbox-multi",
            "backfill_months": 2,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let exchange: serde_json::Value = response.json().await.unwrap();

    let accounts = exchange["accounts"].as_array().unwrap();
    assert_eq!(accounts.len(), 2);

    // One history job per account, not just the first.
    let jobs = exchange["backfill_jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    let mut job_accounts: Vec<&str> = jobs
        .iter()
        .map(|j| j["account_id"].as_str().unwrap())
        .collect();
    let mut linked_accounts: Vec<&str> = accounts
        .iter()
        .map(|a| a["id"].as_str().unwrap())
        .collect();
    job_accounts.sort_unstable();
    linked_accounts.sort_unstable();
    assert_eq!(job_accounts, linked_accounts);
}

#[tokio::test]
async fn destination_test_is_time_bounded() {
    let app = TestApp::spawn().await;

    // A receiver that never answers within the configured budget.
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let created: serde_json::Value = app
        .client
        .post(app.url("/api/destinations"))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({
            "kind": "webhook",
            "name": "slow hook",
            "config": { "url": server.uri(), "secret": "whsec_slow" }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let destination_id = created["id"].as_str().unwrap();

    let started = std::time::Instant::now();
    let response = app
        .client
        .post(app.url(&format!("/api/destinations/{}/test", destination_id)))
        .header("X-Org-ID", ORG)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(
        started.elapsed() < std::time::Duration::from_secs(10),
        "handler must give up once the client timeout elapses"
    );

    let stored = app.store.get_destination(destination_id).await.unwrap().unwrap();
    assert_eq!(
        stored.status,
        statement_service::models::DestinationStatus::Error
    );
}

#[tokio::test]
async fn backfill_range_is_validated_synchronously() {
    let app = TestApp::spawn().await;
    let exchange = link(&app).await;
    let account_id = exchange["accounts"][0]["id"].as_str().unwrap();

    // Thirteen months is over the limit.
    let response = app
        .client
        .post(app.url(&format!("/api/accounts/{}/backfill", account_id)))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({ "range_start": "2023-01-01", "range_end": "2024-02-01" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Inverted range.
    let response = app
        .client
        .post(app.url(&format!("/api/accounts/{}/backfill", account_id)))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({ "range_start": "2024-06-01", "range_end": "2024-01-01" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .client
        .post(app.url(&format!("/api/accounts/{}/backfill", account_id)))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({ "range_start": "2024-01-01", "range_end": "2024-06-01" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job: serde_json::Value = response.json().await.unwrap();
    assert_eq!(job["months_total"], 6);
    assert_eq!(job["account_id"], account_id);

    let job_id = job["id"].as_str().unwrap();
    let fetched = app
        .client
        .get(app.url(&format!("/api/backfill/{}", job_id)))
        .header("X-Org-ID", ORG)
        .send()
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
}

#[tokio::test]
async fn cancelled_backfill_rejects_second_cancel() {
    let app = TestApp::spawn().await;
    let exchange = link(&app).await;
    let account_id = exchange["accounts"][0]["id"].as_str().unwrap();

    let job: serde_json::Value = app
        .client
        .post(app.url(&format!("/api/accounts/{}/backfill", account_id)))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({ "range_start": "2024-01-01", "range_end": "2024-03-01" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = job["id"].as_str().unwrap();

    let cancel = app
        .client
        .post(app.url(&format!("/api/backfill/{}/cancel", job_id)))
        .header("X-Org-ID", ORG)
        .send()
        .await
        .unwrap();
    // The worker pool may have finished the job already; either way the
    // second cancel must conflict.
    if cancel.status() == StatusCode::OK {
        let cancelled: serde_json::Value = cancel.json().await.unwrap();
        assert_eq!(cancelled["status"], "cancelled");
    }

    let second = app
        .client
        .post(app.url(&format!("/api/backfill/{}/cancel", job_id)))
        .header("X-Org-ID", ORG)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn destination_secrets_are_encrypted_and_redacted() {
    let app = TestApp::spawn().await;

    // Missing secret is rejected.
    let response = app
        .client
        .post(app.url("/api/destinations"))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({
            "kind": "webhook",
            "name": "ops hook",
            "config": { "url": "https://example.test/hook" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .client
        .post(app.url("/api/destinations"))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({
            "kind": "webhook",
            "name": "ops hook",
            "config": { "url": "https://example.test/hook", "secret": "whsec_plain" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: serde_json::Value = response.json().await.unwrap();
    assert!(created["config"].get("secret").is_none());
    assert!(created["config"].get("secret_enc").is_none());

    // The stored row holds ciphertext that decrypts back to the secret.
    let stored = app
        .store
        .get_destination(created["id"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    let ciphertext = stored.config.get("secret_enc").unwrap();
    assert_ne!(ciphertext, "whsec_plain");
    assert_eq!(app.vault.decrypt(ciphertext).unwrap(), "whsec_plain");
}

#[tokio::test]
async fn route_creation_checks_refs_and_template() {
    let app = TestApp::spawn().await;
    let exchange = link(&app).await;
    let account_id = exchange["accounts"][0]["id"].as_str().unwrap().to_string();

    let destination: serde_json::Value = app
        .client
        .post(app.url("/api/destinations"))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({
            "kind": "dropbox",
            "name": "team dropbox",
            "config": { "access_token": "dbx-token" }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let destination_id = destination["id"].as_str().unwrap().to_string();

    // Unknown account.
    let response = app
        .client
        .post(app.url("/api/routes"))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({
            "account_id": "nope",
            "destination_id": destination_id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Bad template is rejected up front.
    let response = app
        .client
        .post(app.url("/api/routes"))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({
            "account_id": account_id,
            "destination_id": destination_id,
            "filename_template": "{unknownToken}",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .client
        .post(app.url("/api/routes"))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({
            "account_id": account_id,
            "destination_id": destination_id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let route: serde_json::Value = response.json().await.unwrap();
    assert_eq!(route["active"], true);

    // Deactivate.
    let response = app
        .client
        .put(app.url(&format!("/api/routes/{}", route["id"].as_str().unwrap())))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({ "active": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated: serde_json::Value = response.json().await.unwrap();
    assert_eq!(updated["active"], false);
}

#[tokio::test]
async fn retry_rejects_non_failed_deliveries() {
    let app = TestApp::spawn().await;
    let exchange = link(&app).await;
    let account_id = exchange["accounts"][0]["id"].as_str().unwrap();

    let account = app.store.get_account(account_id).await.unwrap().unwrap();
    let statement = statement_service::models::Statement::new(
        ORG.to_string(),
        account.id.clone(),
        "stmt-up-1".to_string(),
        "2024-05-01".parse().unwrap(),
        "2024-05-31".parse().unwrap(),
        "2024-06-01".parse().unwrap(),
        statement_service::models::StatementFileType::Pdf,
        "checksum".to_string(),
        1,
        None,
    );
    app.store.insert_statement(statement.clone()).await.unwrap();
    let delivery = statement_service::models::Delivery::new(
        ORG.to_string(),
        statement.id.clone(),
        "dest-1".to_string(),
        "rule-1".to_string(),
    );
    app.store.insert_delivery(delivery.clone()).await.unwrap();

    let response = app
        .client
        .post(app.url(&format!("/api/deliveries/{}/retry", delivery.id)))
        .header("X-Org-ID", ORG)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn statements_list_includes_delivery_summaries() {
    let app = TestApp::spawn().await;
    let exchange = link(&app).await;
    let account_id = exchange["accounts"][0]["id"].as_str().unwrap().to_string();
    let account = app.store.get_account(&account_id).await.unwrap().unwrap();

    // The linking flow already ran a statement check, so the next poll only
    // covers the window since then; the period must reach into it.
    let today = chrono::Utc::now().date_naive();
    let start = (today - chrono::Duration::days(30)).to_string();
    let end = today.to_string();
    app.sandbox
        .push_statement(&account.upstream_account_id, upstream_statement("s9", &start, &end));

    // Trigger an on-demand check and wait for the worker to commit the row.
    let response = app
        .client
        .post(app.url(&format!("/api/accounts/{}/sync", account_id)))
        .header("X-Org-ID", ORG)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let mut statements = Vec::new();
    for _ in 0..50 {
        let response = app
            .client
            .get(app.url(&format!("/api/statements/{}", account_id)))
            .header("X-Org-ID", ORG)
            .send()
            .await
            .unwrap();
        statements = response.json::<Vec<serde_json::Value>>().await.unwrap();
        if !statements.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0]["version"], 1);
    assert!(statements[0]["deliveries"].as_array().unwrap().is_empty());

    // Foreign org gets a 404, not an empty list.
    let response = app
        .client
        .get(app.url(&format!("/api/statements/{}", account_id)))
        .header("X-Org-ID", "someone-else")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn inbound_webhook_verifies_signature() {
    let app = TestApp::spawn().await;
    let exchange = link(&app).await;
    let connection_id = exchange["connection"]["id"].as_str().unwrap();
    let connection = app.store.get_connection(connection_id).await.unwrap().unwrap();

    let body = serde_json::to_vec(&serde_json::json!({
        "webhook_type": "ITEM",
        "webhook_code": "ERROR",
        "item_id": connection.item_id,
    }))
    .unwrap();

    // Missing signature.
    let response = app
        .client
        .post(app.url("/api/webhooks/aggregator"))
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Wrong signature.
    let response = app
        .client
        .post(app.url("/api/webhooks/aggregator"))
        .header("X-Aggregator-Signature", "deadbeef")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Valid signature flips the connection to reauth_required.
    let signature = sign_payload(AGGREGATOR_SECRET, &body);
    let response = app
        .client
        .post(app.url("/api/webhooks/aggregator"))
        .header("X-Aggregator-Signature", signature)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let refreshed = app.store.get_connection(connection_id).await.unwrap().unwrap();
    assert_eq!(
        refreshed.status,
        statement_service::models::ConnectionStatus::ReauthRequired
    );
}

#[tokio::test]
async fn notification_preferences_are_stored() {
    let app = TestApp::spawn().await;
    let exchange = link(&app).await;
    let account_id = exchange["accounts"][0]["id"].as_str().unwrap();

    let response = app
        .client
        .put(app.url(&format!("/api/notifications/preferences/{}", account_id)))
        .header("X-Org-ID", ORG)
        .json(&serde_json::json!({ "on_delivery_failure": true, "channel": "email" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
