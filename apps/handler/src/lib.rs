//! PetVet WhatsApp handler service.
//!
//! Wires the webhook gateway, the job queue with its worker pool, the flow
//! engine, and the outbound dispatcher into one axum application.

pub mod config;
pub mod directory;
pub mod health;
pub mod outbound;
pub mod webhook;
pub mod worker;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    routing::get,
};

use pvm_core::MessageJob;
use pvm_idempotency::IdempotencyGuard;
use pvm_queue::JobQueue;

pub use config::Config;
pub use worker::MessageWorker;

/// Shared state behind the HTTP surface.
pub struct AppState {
    pub config: Config,
    pub queue: Arc<JobQueue<MessageJob>>,
    pub guard: IdempotencyGuard,
    pub started_at: Instant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/webhooks/whatsapp",
            get(webhook::verify).post(webhook::receive),
        )
        .route("/health", get(health::health))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/health/detailed", get(health::detailed))
        .with_state(state)
}
