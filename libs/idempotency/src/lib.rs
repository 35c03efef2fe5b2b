//! Deduplication of provider message ids.
//!
//! The provider delivers webhooks at-least-once and the job queue retries
//! at-least-once on top of that, so the gateway consults this guard before
//! enqueueing: a message id seen within the TTL window is dropped. The store
//! is a trait so a shared backend can replace the in-memory map when the
//! gateway runs on more than one node.

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::warn;

/// Contract implemented by idempotency stores.
#[async_trait]
pub trait IdemStore: Send + Sync {
    /// Attempts to register `key` with the provided TTL. Returns `Ok(true)`
    /// when the key did not previously exist (the caller should continue
    /// processing), `Ok(false)` for a duplicate.
    async fn put_if_absent(&self, key: &str, ttl_s: u64) -> Result<bool>;
}

pub type SharedIdemStore = Arc<dyn IdemStore>;

/// In-memory store with lazy expiry.
#[derive(Clone, Default)]
pub struct InMemoryIdemStore {
    inner: Arc<RwLock<HashMap<String, OffsetDateTime>>>,
}

impl InMemoryIdemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn purge_expired(&self, now: OffsetDateTime) {
        let mut guard = self.inner.write().await;
        guard.retain(|_, expires| *expires > now);
    }
}

#[async_trait]
impl IdemStore for InMemoryIdemStore {
    async fn put_if_absent(&self, key: &str, ttl_s: u64) -> Result<bool> {
        let ttl = Duration::seconds(ttl_s as i64);
        let now = OffsetDateTime::now_utc();
        let mut guard = self.inner.write().await;
        match guard.get(key) {
            Some(exp) if *exp > now => Ok(false),
            _ => {
                guard.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }
}

/// Guard used by the webhook gateway to deduplicate inbound messages.
#[derive(Clone)]
pub struct IdempotencyGuard {
    ttl_secs: u64,
    store: SharedIdemStore,
}

impl IdempotencyGuard {
    pub fn new(store: SharedIdemStore, ttl_hours: u64) -> Self {
        Self {
            store,
            ttl_secs: ttl_hours.saturating_mul(3600).max(60),
        }
    }

    pub fn in_memory(ttl_hours: u64) -> Self {
        Self::new(Arc::new(InMemoryIdemStore::new()), ttl_hours)
    }

    /// Returns `Ok(true)` when the caller should proceed (first sighting).
    pub async fn should_process(&self, msg_id: &str) -> Result<bool> {
        let inserted = self.store.put_if_absent(msg_id, self.ttl_secs).await?;
        if !inserted {
            warn!(msg_id = %msg_id, "duplicate message dropped");
            metrics::counter!("idempotency_hit").increment(1);
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_dedupes() {
        let store = InMemoryIdemStore::new();
        assert!(store.put_if_absent("k", 10).await.unwrap());
        assert!(!store.put_if_absent("k", 10).await.unwrap());
        store.inner.write().await.insert(
            "expired".into(),
            OffsetDateTime::now_utc() - Duration::seconds(5),
        );
        assert!(store.put_if_absent("expired", 1).await.unwrap());
    }

    #[tokio::test]
    async fn guard_should_process_once() {
        let guard = IdempotencyGuard::in_memory(1);
        assert!(guard.should_process("wamid.A").await.unwrap());
        assert!(!guard.should_process("wamid.A").await.unwrap());
        assert!(guard.should_process("wamid.B").await.unwrap());
    }

    #[tokio::test]
    async fn purge_drops_expired_only() {
        let store = InMemoryIdemStore::new();
        store.put_if_absent("fresh", 3600).await.unwrap();
        store.inner.write().await.insert(
            "stale".into(),
            OffsetDateTime::now_utc() - Duration::seconds(1),
        );
        store.purge_expired(OffsetDateTime::now_utc()).await;
        assert!(!store.put_if_absent("fresh", 3600).await.unwrap());
        assert!(store.put_if_absent("stale", 3600).await.unwrap());
    }
}
