//! Main vault orchestration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::credential::CredentialManager;
use crate::crypto::{KdfParams, SecretString, VaultKey};
use crate::error::{Result, VaultError};
use crate::preferences::{PreferencesUpdate, UserPreferences};
use crate::session::{KeyStatus, VaultSession};
use crate::settings::{SettingsManager, VaultSettings};
use crate::storage::{CredentialStore, FileCredentialStore};

/// Entry point tying the store, settings, and credential manager together
pub struct Vault {
    /// Storage backend
    store: Arc<FileCredentialStore>,
    /// Credential manager
    pub credentials: CredentialManager,
    /// Settings manager (non-sensitive config)
    settings_manager: SettingsManager,
    /// KDF parameters for new sessions
    kdf: KdfParams,
}

impl Vault {
    /// Open the vault in the default data directory
    pub fn open() -> Result<Self> {
        Self::open_at(FileCredentialStore::default_dir()?)
    }

    /// Open the vault in a custom directory
    pub fn open_at(dir: PathBuf) -> Result<Self> {
        let store = Arc::new(FileCredentialStore::with_dir(dir)?);
        let settings_manager = SettingsManager::new(store.storage_dir())?;
        let credentials = CredentialManager::with_settings(store.clone(), settings_manager.get());

        info!(dir = ?store.storage_dir(), "Opened vault");

        Ok(Self {
            store,
            credentials,
            settings_manager,
            kdf: KdfParams::current(),
        })
    }

    /// Use different KDF parameters for sessions opened from now on
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf = params;
        self
    }

    pub fn kdf_params(&self) -> KdfParams {
        self.kdf
    }

    /// Unlock with the current KDF parameters
    pub async fn unlock(&self, passphrase: impl Into<SecretString>) -> Result<VaultSession> {
        self.unlock_with_params(passphrase, self.kdf).await
    }

    /// Unlock with explicit KDF parameters, e.g. an older version whose
    /// records are about to be migrated
    pub async fn unlock_with_params(
        &self,
        passphrase: impl Into<SecretString>,
        params: KdfParams,
    ) -> Result<VaultSession> {
        VaultSession::unlock(&*self.store, passphrase.into(), params).await
    }

    /// Re-encrypt everything the session can open under a new passphrase
    ///
    /// Also moves records onto the current KDF version. The session switches
    /// to the new key and its reference becomes the recorded one. Returns the
    /// number of records re-encrypted.
    ///
    /// Refused, with nothing changed, when the session key is not the
    /// vault's recorded key: re-encrypting from a mistyped passphrase would
    /// move nothing and then make the new passphrase the recorded one.
    pub async fn change_passphrase(
        &self,
        session: &mut VaultSession,
        new_passphrase: impl Into<SecretString>,
    ) -> Result<usize> {
        if session.refresh_status(&*self.store).await? == KeyStatus::Mismatch {
            return Err(VaultError::InvalidInput(
                "unlock with the vault's current passphrase before changing it".to_string(),
            ));
        }

        let new_key = VaultKey::derive_blocking(new_passphrase.into(), self.kdf).await?;
        let migrated = self.credentials.reencrypt(session.key()?, &new_key).await?;

        session.rekey(new_key);
        session.adopt(&*self.store).await?;

        info!(migrated, "Passphrase changed");
        Ok(migrated)
    }

    /// Get current settings
    pub fn settings(&self) -> &VaultSettings {
        self.settings_manager.get()
    }

    /// Update settings, save, and apply them to the credential manager
    pub async fn update_settings(&mut self, settings: VaultSettings) -> Result<()> {
        self.settings_manager.update(settings).await?;
        self.credentials =
            CredentialManager::with_settings(self.store.clone(), self.settings_manager.get());
        Ok(())
    }

    pub async fn preferences(&self) -> Result<UserPreferences> {
        self.store.get_preferences().await
    }

    pub async fn update_preferences(&self, update: PreferencesUpdate) -> Result<UserPreferences> {
        self.store.set_preferences(update).await
    }

    /// Get the storage directory path
    pub fn storage_dir(&self) -> &Path {
        self.store.storage_dir()
    }

    /// Storage backend in use
    pub fn store(&self) -> &Arc<FileCredentialStore> {
        &self.store
    }
}
