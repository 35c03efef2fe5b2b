//! Liveness/readiness/detailed health surface.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::AppState;

const SERVICE: &str = "pvm-handler";

/// Queue backlog levels that flip the detailed check to degraded.
const WAITING_DEGRADED: usize = 1_000;
const ACTIVE_DEGRADED: usize = 100;

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".into())
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.queue.is_ready() {
        (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "timestamp": timestamp(),
                "service": SERVICE,
                "version": env!("CARGO_PKG_VERSION"),
            })),
        )
    } else {
        tracing::warn!("health check failed: queue not ready");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "timestamp": timestamp(),
                "checks": { "queue": "not ready" },
            })),
        )
    }
}

pub async fn live() -> impl IntoResponse {
    Json(json!({ "status": "live" }))
}

pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.queue.is_ready() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "reason": "queue not connected" })),
        )
    }
}

pub async fn detailed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counts = state.queue.counts();
    let queue_ready = state.queue.is_ready();

    let backlog_degraded = counts.waiting > WAITING_DEGRADED || counts.active > ACTIVE_DEGRADED;
    let status = if !queue_ready {
        "unhealthy"
    } else if backlog_degraded {
        "degraded"
    } else {
        "healthy"
    };
    let code = if queue_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "timestamp": timestamp(),
            "service": SERVICE,
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "checks": {
                "queue": if queue_ready { "healthy" } else { "unhealthy" },
                "queue/backlog": if backlog_degraded { "degraded" } else { "healthy" },
            },
            "queue": {
                "waiting": counts.waiting,
                "active": counts.active,
                "failed": counts.failed,
            },
        })),
    )
}
