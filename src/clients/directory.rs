use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{directory::RecipientProfile, error::StoreError};

/// User-profile lookup used by direct sends.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn find(&self, recipient_id: &str) -> Result<Option<RecipientProfile>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryRecipientDirectory {
    profiles: RwLock<HashMap<String, RecipientProfile>>,
}

impl InMemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, profile: RecipientProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.recipient_id.clone(), profile);
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryRecipientDirectory {
    async fn find(&self, recipient_id: &str) -> Result<Option<RecipientProfile>, StoreError> {
        Ok(self.profiles.read().await.get(recipient_id).cloned())
    }
}
