use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use pvm_clients::{
    BackendApi, HttpAnalysisClient, HttpBackendClient, HttpBillingClient, WhatsAppClient,
};
use pvm_flows::{FlowEngine, FlowServices};
use pvm_handler::directory::BackendDirectory;
use pvm_handler::{AppState, Config, MessageWorker, router};
use pvm_idempotency::IdempotencyGuard;
use pvm_queue::JobQueue;
use pvm_session::SessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    // The AI service is allowed to be slow.
    let ai_http = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;

    let backend: Arc<dyn BackendApi> = Arc::new(HttpBackendClient::new(
        &config.backend_api_url,
        http.clone(),
    ));
    let analysis = Arc::new(HttpAnalysisClient::new(&config.ai_services_url, ai_http));
    let billing = Arc::new(HttpBillingClient::new(&config.billing_api_url, http.clone()));
    let messaging = Arc::new(WhatsAppClient::new(
        http,
        &config.graph_api_base,
        &config.api_version,
        &config.phone_number_id,
        &config.access_token,
    ));

    let store = pvm_session::store_from_env().await?;
    let sessions = Arc::new(SessionManager::new(
        store,
        Arc::new(BackendDirectory::new(backend.clone())),
        config.session_ttl,
    ));

    let services = Arc::new(FlowServices {
        backend,
        analysis,
        billing,
        messaging: messaging.clone(),
        sessions: sessions.clone(),
    });

    let queue = Arc::new(JobQueue::new(config.queue_capacity, config.retry.clone()));
    let worker = Arc::new(MessageWorker {
        engine: FlowEngine::new(services),
        sessions,
        messaging,
    });
    queue.start_workers(config.worker_count, worker).await;

    let state = Arc::new(AppState {
        guard: IdempotencyGuard::in_memory(config.idempotency_ttl_hours),
        queue,
        started_at: Instant::now(),
        config: config.clone(),
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!("pvm-handler listening on {}", config.bind);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
