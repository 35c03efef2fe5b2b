use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;

use pvm_core::FlowState;

use crate::{Session, SessionLeases, SharedSessionStore};

/// Best-effort lookup against the backend user directory, used to link a new
/// session to an existing backend user.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup_by_address(&self, address: &str) -> Result<Option<DirectoryEntry>>;
}

#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub user_id: String,
    /// Pre-selected when the user has exactly one pet.
    pub active_pet_id: Option<String>,
}

/// High-level session operations shared by the worker pool.
pub struct SessionManager {
    store: SharedSessionStore,
    directory: Arc<dyn UserDirectory>,
    ttl: Duration,
    leases: SessionLeases,
}

impl SessionManager {
    pub fn new(store: SharedSessionStore, directory: Arc<dyn UserDirectory>, ttl: Duration) -> Self {
        Self {
            store,
            directory,
            ttl,
            leases: SessionLeases::new(),
        }
    }

    pub fn leases(&self) -> &SessionLeases {
        &self.leases
    }

    /// Returns the existing session (TTL refreshed) or creates one.
    ///
    /// On creation the backend directory is consulted to pre-link a known
    /// user; a failing lookup is logged and leaves the session anonymous.
    pub async fn get_or_create(
        &self,
        address: &str,
        contact_name: Option<&str>,
    ) -> Result<Session> {
        if let Some(mut session) = self.store.get(address).await? {
            session.touch();
            if session.contact_name.is_none() {
                session.contact_name = contact_name.map(str::to_string);
            }
            self.store.put(&session, self.ttl).await?;
            tracing::debug!(session_id = %session.id, flow = session.state.flow_name(), "session retrieved");
            return Ok(session);
        }

        let mut session = Session::new(address, contact_name.map(str::to_string));
        match self.directory.lookup_by_address(address).await {
            Ok(Some(entry)) => {
                session.user_id = Some(entry.user_id);
                session.active_pet_id = entry.active_pet_id;
            }
            Ok(None) => {
                tracing::debug!(session_id = %session.id, "no backend user for address");
            }
            Err(err) => {
                tracing::warn!(session_id = %session.id, error = %err, "user directory lookup failed; session stays anonymous");
            }
        }

        self.store.put(&session, self.ttl).await?;
        tracing::info!(
            session_id = %session.id,
            linked = session.user_id.is_some(),
            "session created"
        );
        Ok(session)
    }

    /// Replaces the flow state and refreshes the TTL.
    pub async fn update(&self, address: &str, state: FlowState) -> Result<()> {
        if let Some(mut session) = self.store.get(address).await? {
            tracing::debug!(
                session_id = %session.id,
                flow = state.flow_name(),
                step = state.step_name().unwrap_or("-"),
                "session state updated"
            );
            session.state = state;
            session.touch();
            self.store.put(&session, self.ttl).await?;
        } else {
            tracing::warn!(address = %mask(address), "session missing on update");
        }
        Ok(())
    }

    pub async fn set_linked_user(&self, address: &str, user_id: &str) -> Result<()> {
        if let Some(mut session) = self.store.get(address).await? {
            session.user_id = Some(user_id.to_string());
            session.touch();
            self.store.put(&session, self.ttl).await?;
        }
        Ok(())
    }

    pub async fn set_active_pet(&self, address: &str, pet_id: &str) -> Result<()> {
        if let Some(mut session) = self.store.get(address).await? {
            session.active_pet_id = Some(pet_id.to_string());
            session.touch();
            self.store.put(&session, self.ttl).await?;
        }
        Ok(())
    }

    pub async fn clear(&self, address: &str) -> Result<()> {
        self.store.delete(address).await?;
        tracing::info!(address = %mask(address), "session cleared");
        Ok(())
    }
}

/// Addresses are phone numbers; keep logs to a short prefix.
fn mask(address: &str) -> String {
    let prefix: String = address.chars().take(4).collect();
    format!("{prefix}****")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_memory_store;

    struct StaticDirectory(Option<DirectoryEntry>);

    #[async_trait]
    impl UserDirectory for StaticDirectory {
        async fn lookup_by_address(&self, _address: &str) -> Result<Option<DirectoryEntry>> {
            Ok(self.0.clone())
        }
    }

    struct FailingDirectory;

    #[async_trait]
    impl UserDirectory for FailingDirectory {
        async fn lookup_by_address(&self, _address: &str) -> Result<Option<DirectoryEntry>> {
            anyhow::bail!("backend unreachable")
        }
    }

    fn manager(directory: Arc<dyn UserDirectory>) -> SessionManager {
        SessionManager::new(shared_memory_store(), directory, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn new_session_starts_at_main_menu() {
        let mgr = manager(Arc::new(StaticDirectory(None)));
        let session = mgr.get_or_create("5511988887777", Some("Maria")).await.unwrap();
        assert_eq!(session.state, FlowState::main_menu());
        assert_eq!(session.state.step_name(), None);
        assert!(session.user_id.is_none());
        assert_eq!(session.contact_name.as_deref(), Some("Maria"));
    }

    #[tokio::test]
    async fn directory_hit_links_user_and_pet() {
        let mgr = manager(Arc::new(StaticDirectory(Some(DirectoryEntry {
            user_id: "u1".into(),
            active_pet_id: Some("p1".into()),
        }))));
        let session = mgr.get_or_create("551", None).await.unwrap();
        assert_eq!(session.user_id.as_deref(), Some("u1"));
        assert_eq!(session.active_pet_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn directory_failure_is_non_fatal() {
        let mgr = manager(Arc::new(FailingDirectory));
        let session = mgr.get_or_create("551", None).await.unwrap();
        assert!(session.user_id.is_none());
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_address() {
        let mgr = manager(Arc::new(StaticDirectory(None)));
        let first = mgr.get_or_create("551", None).await.unwrap();
        let second = mgr.get_or_create("551", None).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn update_replaces_state_and_setters_stick() {
        let mgr = manager(Arc::new(StaticDirectory(None)));
        let session = mgr.get_or_create("551", None).await.unwrap();

        mgr.update(
            "551",
            FlowState::Subscription {
                step: pvm_core::SubscriptionStep::View,
                selected_plan: None,
            },
        )
        .await
        .unwrap();
        mgr.set_linked_user("551", "u9").await.unwrap();
        mgr.set_active_pet("551", "p9").await.unwrap();

        let reloaded = mgr.get_or_create("551", None).await.unwrap();
        assert_eq!(reloaded.id, session.id);
        assert_eq!(reloaded.state.flow_name(), "subscription");
        assert_eq!(reloaded.user_id.as_deref(), Some("u9"));
        assert_eq!(reloaded.active_pet_id.as_deref(), Some("p9"));
    }

    #[tokio::test]
    async fn clear_removes_session() {
        let mgr = manager(Arc::new(StaticDirectory(None)));
        let first = mgr.get_or_create("551", None).await.unwrap();
        mgr.clear("551").await.unwrap();
        let second = mgr.get_or_create("551", None).await.unwrap();
        assert_ne!(first.id, second.id);
    }
}
