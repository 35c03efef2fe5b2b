//! Webhook gateway: Meta challenge verification and signed ingestion.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use pvm_core::{MessageJob, WHATSAPP_OBJECT, WebhookPayload, extract_content};

use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    token: Option<String>,
}

/// Challenge-response verification (GET). Echoes the challenge verbatim only
/// for a subscribe request carrying the pre-shared token.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    if params.mode.as_deref() == Some("subscribe")
        && params.token.as_deref() == Some(state.config.verify_token.as_str())
    {
        tracing::info!("webhook verified");
        (StatusCode::OK, params.challenge.unwrap_or_default())
    } else {
        tracing::warn!(mode = params.mode.as_deref().unwrap_or("-"), "webhook verification failed");
        (StatusCode::FORBIDDEN, "forbidden".to_string())
    }
}

/// Signed ingestion (POST). The provider enforces a short response SLA, so a
/// valid request is acknowledged immediately and parsing/queueing continues
/// on a detached task.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !verify_signature(&state.config.app_secret, &headers, &body) {
        tracing::warn!("invalid webhook signature");
        return StatusCode::UNAUTHORIZED;
    }

    tokio::spawn(async move {
        ingest(state, body).await;
    });
    StatusCode::OK
}

async fn ingest(state: Arc<AppState>, body: Bytes) {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "failed to decode webhook payload");
            return;
        }
    };

    if payload.object != WHATSAPP_OBJECT {
        tracing::debug!(object = %payload.object, "ignoring non-whatsapp webhook");
        return;
    }

    for entry in &payload.entry {
        for change in &entry.changes {
            if change.field != "messages" {
                continue;
            }
            let value = &change.value;

            // Delivery receipts are observability-only, never jobs.
            for status in &value.statuses {
                tracing::debug!(
                    message_id = %status.id,
                    status = %status.status,
                    recipient = status.recipient_id.as_deref().unwrap_or("-"),
                    "message status update"
                );
            }

            let contact_name = value
                .contacts
                .first()
                .and_then(|contact| contact.profile.as_ref())
                .map(|profile| profile.name.clone());
            let channel = value.metadata.clone().unwrap_or_default();

            for message in &value.messages {
                match state.guard.should_process(&message.id).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        // A broken dedup store must not stall ingestion.
                        tracing::error!(error = %err, message_id = %message.id, "idempotency check failed; continuing");
                    }
                }

                let job = MessageJob::new(
                    &message.id,
                    &message.from,
                    contact_name.clone(),
                    extract_content(message),
                    channel.clone(),
                );
                match state.queue.enqueue(job).await {
                    Ok(job_id) => {
                        metrics::counter!("messages_ingressed").increment(1);
                        tracing::info!(
                            %job_id,
                            message_id = %message.id,
                            kind = %message.kind,
                            "message queued"
                        );
                    }
                    Err(err) => {
                        tracing::error!(error = %err, message_id = %message.id, "failed to enqueue message");
                    }
                }
            }
        }
    }
}

/// Validates `X-Hub-Signature-256: sha256=<hex>` over the exact raw body.
pub fn verify_signature(app_secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let Some(provided) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(provided.as_bytes(), expected.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"entry":[]}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Hub-Signature-256",
            HeaderValue::from_str(&sign("secret", body)).unwrap(),
        );
        assert!(verify_signature("secret", &headers, body));
    }

    #[test]
    fn rejects_bad_signature() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Hub-Signature-256",
            HeaderValue::from_static("sha256=deadbeef"),
        );
        assert!(!verify_signature("secret", &headers, b"{}"));
    }

    #[test]
    fn rejects_missing_prefix_and_header() {
        let body = b"{}";
        let signature = sign("secret", body);
        let unprefixed = signature.trim_start_matches("sha256=");
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Hub-Signature-256",
            HeaderValue::from_str(unprefixed).unwrap(),
        );
        assert!(!verify_signature("secret", &headers, body));
        assert!(!verify_signature("secret", &HeaderMap::new(), body));
    }
}
