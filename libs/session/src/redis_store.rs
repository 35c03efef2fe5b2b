use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::{Session, SessionStore};

pub struct RedisSessionStore {
    namespace: String,
    connection: Mutex<redis::aio::ConnectionManager>,
}

impl RedisSessionStore {
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self {
            namespace: namespace.into(),
            connection: Mutex::new(manager),
        })
    }

    fn session_key(&self, address: &str) -> String {
        format!("{}:session:{}", self.namespace, address)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, session: &Session, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(session)?;
        let key = self.session_key(&session.address);
        let mut conn = self.connection.lock().await;
        conn.set_ex::<_, _, ()>(key, payload, ttl.as_secs()).await?;
        Ok(())
    }

    async fn get(&self, address: &str) -> Result<Option<Session>> {
        let key = self.session_key(address);
        let mut conn = self.connection.lock().await;
        let payload: Option<String> = conn.get(key).await?;
        let session = match payload {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(session)
    }

    async fn delete(&self, address: &str) -> Result<()> {
        let key = self.session_key(address);
        let mut conn = self.connection.lock().await;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}
