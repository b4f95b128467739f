//! Volatile store, for tests and ephemeral sessions

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::snapshot::StoreSnapshot;
use super::CredentialStore;
use crate::credential::EncryptedCredential;
use crate::error::Result;
use crate::preferences::{PreferencesUpdate, UserPreferences};
use crate::provider::Provider;

/// Credential store held entirely in process memory
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: RwLock<StoreSnapshot>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn put(&self, record: EncryptedCredential, make_default: bool) -> Result<()> {
        let mut state = self.state.write().await;
        state.put(record, make_default);
        state.revision += 1;
        Ok(())
    }

    async fn put_if(
        &self,
        record: EncryptedCredential,
        make_default: bool,
        expected: &[EncryptedCredential],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.put_if(record, make_default, expected)?;
        state.revision += 1;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<EncryptedCredential>> {
        Ok(self.state.read().await.get_all())
    }

    async fn get_by_id(&self, key_id: &str) -> Result<Option<EncryptedCredential>> {
        Ok(self.state.read().await.get_by_id(key_id))
    }

    async fn get_by_provider(&self, provider: Provider) -> Result<Vec<EncryptedCredential>> {
        Ok(self.state.read().await.records_for(provider))
    }

    async fn get_default(&self, provider: Provider) -> Result<Option<EncryptedCredential>> {
        Ok(self.state.read().await.get_default(provider))
    }

    async fn delete(&self, key_id: &str) -> Result<Option<EncryptedCredential>> {
        let mut state = self.state.write().await;
        let removed = state.delete(key_id);
        if removed.is_some() {
            state.revision += 1;
        }
        Ok(removed)
    }

    async fn delete_if(
        &self,
        key_id: &str,
        expected: &[EncryptedCredential],
    ) -> Result<Option<EncryptedCredential>> {
        let mut state = self.state.write().await;
        let removed = state.delete_if(key_id, expected)?;
        if removed.is_some() {
            state.revision += 1;
        }
        Ok(removed)
    }

    async fn replace_all_if(
        &self,
        records: Vec<EncryptedCredential>,
        expected: &[EncryptedCredential],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.replace_all_if(records, expected)?;
        state.revision += 1;
        Ok(())
    }

    async fn get_preferences(&self) -> Result<UserPreferences> {
        Ok(self.state.read().await.preferences())
    }

    async fn set_preferences(&self, update: PreferencesUpdate) -> Result<UserPreferences> {
        let mut state = self.state.write().await;
        let prefs = state.set_preferences(update);
        state.revision += 1;
        Ok(prefs)
    }

    fn backend_name(&self) -> &'static str {
        "In-Memory Storage"
    }
}
