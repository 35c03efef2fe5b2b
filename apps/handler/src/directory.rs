use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use pvm_clients::BackendApi;
use pvm_session::{DirectoryEntry, UserDirectory};

/// Resolves a sender address to an existing backend user (and their single
/// pet, when there is exactly one) for session pre-linking.
pub struct BackendDirectory {
    backend: Arc<dyn BackendApi>,
}

impl BackendDirectory {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl UserDirectory for BackendDirectory {
    async fn lookup_by_address(&self, address: &str) -> Result<Option<DirectoryEntry>> {
        let Some(user) = self.backend.lookup_user_by_phone(address).await? else {
            return Ok(None);
        };
        let pets = self.backend.get_pets(&user.id).await?;
        let active_pet_id = match pets.as_slice() {
            [only] => Some(only.id.clone()),
            _ => None,
        };
        Ok(Some(DirectoryEntry {
            user_id: user.id,
            active_pet_id,
        }))
    }
}
