//! Gateway contract tests: verification, signatures, object filtering,
//! status updates, and dedup, driven through the axum router.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use hmac::{Hmac, Mac};
use http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use sha2::Sha256;
use tower::ServiceExt;

use pvm_handler::{AppState, Config, router};
use pvm_idempotency::IdempotencyGuard;
use pvm_queue::JobQueue;

type HmacSha256 = Hmac<Sha256>;

fn test_state() -> Arc<AppState> {
    let config = Config::for_tests();
    Arc::new(AppState {
        queue: Arc::new(JobQueue::new(config.queue_capacity, config.retry.clone())),
        guard: IdempotencyGuard::in_memory(config.idempotency_ttl_hours),
        started_at: Instant::now(),
        config,
    })
}

fn app(state: Arc<AppState>) -> Router {
    router(state)
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn message_payload() -> String {
    serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "ent-1",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {
                        "display_phone_number": "5511999990000",
                        "phone_number_id": "phone-1"
                    },
                    "contacts": [{ "wa_id": "5511988887777", "profile": { "name": "Maria" } }],
                    "messages": [{
                        "from": "5511988887777",
                        "id": "wamid.A1",
                        "timestamp": "1700000000",
                        "type": "text",
                        "text": { "body": "Oi" }
                    }]
                }
            }]
        }]
    })
    .to_string()
}

async fn post_webhook(app: Router, body: String, signature: Option<String>) -> StatusCode {
    let mut request = Request::post("/webhooks/whatsapp")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        request = request.header("X-Hub-Signature-256", signature);
    }
    let response = app
        .oneshot(request.body(body.into()).unwrap())
        .await
        .unwrap();
    response.status()
}

/// Queueing happens after the ack, on a detached task.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn verification_echoes_challenge() {
    let state = test_state();
    let response = app(state)
        .oneshot(
            Request::get(
                "/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=test-verify-token&hub.challenge=CH4LL3NGE",
            )
            .body(axum::body::Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"CH4LL3NGE");
}

#[tokio::test]
async fn verification_rejects_bad_token() {
    let state = test_state();
    for query in [
        "hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=CH",
        "hub.mode=unsubscribe&hub.verify_token=test-verify-token&hub.challenge=CH",
        "hub.mode=subscribe&hub.challenge=CH",
    ] {
        let response = app(state.clone())
            .oneshot(
                Request::get(format!("/webhooks/whatsapp?{query}"))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn valid_signature_enqueues_one_job() {
    let state = test_state();
    let body = message_payload();
    let signature = sign(&state.config.app_secret, body.as_bytes());

    let status = post_webhook(app(state.clone()), body, Some(signature)).await;
    assert_eq!(status, StatusCode::OK);

    settle().await;
    assert_eq!(state.queue.counts().waiting, 1);
}

#[tokio::test]
async fn duplicate_message_id_is_dropped() {
    let state = test_state();
    let body = message_payload();
    let signature = sign(&state.config.app_secret, body.as_bytes());

    for _ in 0..2 {
        let status = post_webhook(
            app(state.clone()),
            body.clone(),
            Some(signature.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    settle().await;
    assert_eq!(state.queue.counts().waiting, 1);
}

#[tokio::test]
async fn tampered_signature_enqueues_nothing() {
    let state = test_state();
    let body = message_payload();

    let status = post_webhook(
        app(state.clone()),
        body.clone(),
        Some("sha256=deadbeefdeadbeef".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let status = post_webhook(app(state.clone()), body, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    settle().await;
    assert_eq!(state.queue.counts().waiting, 0);
}

#[tokio::test]
async fn wrong_object_type_is_acknowledged_but_ignored() {
    let state = test_state();
    let body = serde_json::json!({ "object": "instagram", "entry": [] }).to_string();
    let signature = sign(&state.config.app_secret, body.as_bytes());

    let status = post_webhook(app(state.clone()), body, Some(signature)).await;
    assert_eq!(status, StatusCode::OK);

    settle().await;
    assert_eq!(state.queue.counts().waiting, 0);
}

#[tokio::test]
async fn status_updates_are_not_enqueued() {
    let state = test_state();
    let body = serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "ent-1",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {
                        "display_phone_number": "5511999990000",
                        "phone_number_id": "phone-1"
                    },
                    "statuses": [{
                        "id": "wamid.OUT1",
                        "status": "delivered",
                        "recipient_id": "5511988887777",
                        "timestamp": "1700000001"
                    }]
                }
            }]
        }]
    })
    .to_string();
    let signature = sign(&state.config.app_secret, body.as_bytes());

    let status = post_webhook(app(state.clone()), body, Some(signature)).await;
    assert_eq!(status, StatusCode::OK);

    settle().await;
    assert_eq!(state.queue.counts().waiting, 0);
}

#[tokio::test]
async fn multiple_messages_fan_out_to_multiple_jobs() {
    let state = test_state();
    let body = serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "ent-1",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {
                        "display_phone_number": "5511999990000",
                        "phone_number_id": "phone-1"
                    },
                    "messages": [
                        {
                            "from": "5511988887777",
                            "id": "wamid.B1",
                            "timestamp": "1700000000",
                            "type": "text",
                            "text": { "body": "Oi" }
                        },
                        {
                            "from": "5511977776666",
                            "id": "wamid.B2",
                            "timestamp": "1700000002",
                            "type": "text",
                            "text": { "body": "Ola" }
                        }
                    ]
                }
            }]
        }]
    })
    .to_string();
    let signature = sign(&state.config.app_secret, body.as_bytes());

    let status = post_webhook(app(state.clone()), body, Some(signature)).await;
    assert_eq!(status, StatusCode::OK);

    settle().await;
    assert_eq!(state.queue.counts().waiting, 2);
}

#[tokio::test]
async fn health_endpoints_report_ready_queue() {
    let state = test_state();

    let response = app(state.clone())
        .oneshot(
            Request::get("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(state.clone())
        .oneshot(
            Request::get("/health/detailed")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["status"], "healthy");
    assert_eq!(parsed["checks"]["queue"], "healthy");
}
