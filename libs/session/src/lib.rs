//! Per-user conversation sessions.
//!
//! Storage is keyed by the sender address end-to-end; there is no update-by-id
//! path and therefore no key scan anywhere. TTL is sliding: every access
//! refreshes it, nothing shortens it.

mod lease;
mod manager;
mod memory;
#[cfg(feature = "redis-store")]
mod redis_store;

use std::{env, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use pvm_core::FlowState;

pub use lease::SessionLeases;
pub use manager::{DirectoryEntry, SessionManager, UserDirectory};
pub use memory::MemorySessionStore;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisSessionStore;

/// Shared session store handle used across the worker pool.
pub type SharedSessionStore = Arc<dyn SessionStore>;

/// Durable per-user conversation record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    /// Sender address (phone-equivalent); the only storage key.
    pub address: String,
    /// Linked backend user, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_pet_id: Option<String>,
    pub state: FlowState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
}

impl Session {
    pub fn new(address: impl Into<String>, contact_name: Option<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            user_id: None,
            contact_name,
            active_pet_id: None,
            state: FlowState::main_menu(),
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = OffsetDateTime::now_utc();
    }
}

/// Address-keyed storage contract.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists the session and (re)arms its TTL.
    async fn put(&self, session: &Session, ttl: Duration) -> Result<()>;
    async fn get(&self, address: &str) -> Result<Option<Session>>;
    async fn delete(&self, address: &str) -> Result<()>;
}

/// Returns an in-memory session store wrapped in an [`Arc`].
pub fn shared_memory_store() -> SharedSessionStore {
    Arc::new(MemorySessionStore::new())
}

/// Builds a session store from environment variables.
///
/// If `SESSION_REDIS_URL` is set and the `redis-store` feature is enabled, a
/// Redis-backed store is created; otherwise the in-memory implementation is
/// used.
pub async fn store_from_env() -> Result<SharedSessionStore> {
    match env::var("SESSION_REDIS_URL") {
        Ok(url) => {
            let namespace = env::var("SESSION_NAMESPACE").unwrap_or_else(|_| "pvm".into());
            build_redis_store(&url, &namespace).await
        }
        Err(_) => Ok(shared_memory_store()),
    }
}

#[cfg(feature = "redis-store")]
async fn build_redis_store(url: &str, namespace: &str) -> Result<SharedSessionStore> {
    let store = RedisSessionStore::connect(url, namespace).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis-store"))]
async fn build_redis_store(_url: &str, _namespace: &str) -> Result<SharedSessionStore> {
    tracing::warn!("redis-store feature disabled; using in-memory session store");
    Ok(shared_memory_store())
}
