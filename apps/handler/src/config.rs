use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use pvm_queue::RetryPolicy;

/// Environment-driven service configuration.
///
/// Development defaults keep the service bootable without a full secret set;
/// production deployments override everything via the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    /// Pre-shared token echoed back during webhook verification.
    pub verify_token: String,
    /// Shared secret for the webhook HMAC signature.
    pub app_secret: String,
    pub access_token: String,
    pub phone_number_id: String,
    pub api_version: String,
    pub graph_api_base: String,
    pub backend_api_url: String,
    pub ai_services_url: String,
    pub billing_api_url: String,
    pub session_ttl: Duration,
    pub idempotency_ttl_hours: u64,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind: SocketAddr = env_or("BIND", "0.0.0.0:3001")
            .parse()
            .context("invalid BIND address")?;
        let backend_api_url = env_or("API_URL", "http://localhost:3000");
        let billing_api_url =
            std::env::var("BILLING_API_URL").unwrap_or_else(|_| backend_api_url.clone());

        Ok(Self {
            bind,
            verify_token: env_or("WHATSAPP_VERIFY_TOKEN", "dev-verify-token"),
            app_secret: env_or("WHATSAPP_APP_SECRET", "dev-app-secret"),
            access_token: env_or("WHATSAPP_ACCESS_TOKEN", "dev-access-token"),
            phone_number_id: env_or("WHATSAPP_PHONE_NUMBER_ID", "dev-phone-id"),
            api_version: env_or("WHATSAPP_API_VERSION", "v18.0"),
            graph_api_base: env_or("WA_API_BASE", "https://graph.facebook.com"),
            backend_api_url,
            ai_services_url: env_or("AI_SERVICES_URL", "http://localhost:8000"),
            billing_api_url,
            session_ttl: Duration::from_secs(env_parse("SESSION_TTL_SECONDS", 86_400)),
            idempotency_ttl_hours: env_parse("IDEMPOTENCY_TTL_HOURS", 24),
            worker_count: env_parse("QUEUE_WORKERS", 4),
            queue_capacity: env_parse("QUEUE_CAPACITY", 1024),
            retry: RetryPolicy {
                max_attempts: env_parse("QUEUE_MAX_ATTEMPTS", 3),
                base_delay: Duration::from_millis(env_parse("QUEUE_BACKOFF_MS", 1_000)),
                max_delay: Duration::from_secs(30),
            },
        })
    }

    /// Minimal configuration for tests.
    pub fn for_tests() -> Self {
        Self {
            bind: "127.0.0.1:0".parse().unwrap(),
            verify_token: "test-verify-token".into(),
            app_secret: "test-app-secret".into(),
            access_token: "test-access-token".into(),
            phone_number_id: "test-phone-id".into(),
            api_version: "v18.0".into(),
            graph_api_base: "mock://wa".into(),
            backend_api_url: "http://localhost:3000".into(),
            ai_services_url: "http://localhost:8000".into(),
            billing_api_url: "http://localhost:3000".into(),
            session_ttl: Duration::from_secs(60),
            idempotency_ttl_hours: 1,
            worker_count: 1,
            queue_capacity: 64,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
        }
    }
}
