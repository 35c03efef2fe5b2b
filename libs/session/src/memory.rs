use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use crate::{Session, SessionStore};

/// In-memory store with lazy expiry, used in tests and single-node setups.
#[derive(Default)]
pub struct MemorySessionStore {
    by_address: DashMap<String, Entry>,
}

struct Entry {
    session: Session,
    expires_at: OffsetDateTime,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session: &Session, ttl: Duration) -> Result<()> {
        self.by_address.insert(
            session.address.clone(),
            Entry {
                session: session.clone(),
                expires_at: OffsetDateTime::now_utc() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, address: &str) -> Result<Option<Session>> {
        if let Some(entry) = self.by_address.get(address) {
            if entry.expires_at > OffsetDateTime::now_utc() {
                return Ok(Some(entry.session.clone()));
            }
        }
        // Expired entries are dropped on the next read.
        self.by_address
            .remove_if(address, |_, entry| entry.expires_at <= OffsetDateTime::now_utc());
        Ok(None)
    }

    async fn delete(&self, address: &str) -> Result<()> {
        self.by_address.remove(address);
        Ok(())
    }
}
