//! Unlocked vault session
//!
//! A [`VaultSession`] owns the key derived from the user's passphrase for as
//! long as the vault stays unlocked. Nothing else keeps a copy: managers take
//! the key by reference per call. Locking or dropping the session zeroizes it.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::crypto::{KdfParams, SecretString, VaultKey};
use crate::error::{Result, VaultError};
use crate::preferences::PreferencesUpdate;
use crate::storage::CredentialStore;

/// How the unlocking key relates to the one recorded in preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// No key was recorded yet; this one is now
    FirstUse,
    /// Same key as the last unlock
    Matches,
    /// A different passphrase (or KDF version) than the recorded one; records
    /// written under the old key will show up as locked
    Mismatch,
}

/// Key material for one unlocked session
#[derive(Debug)]
pub struct VaultSession {
    key: Option<VaultKey>,
    status: KeyStatus,
    unlocked_at: DateTime<Utc>,
}

impl VaultSession {
    /// Derive the session key and check it against preferences
    ///
    /// The KDF runs on the blocking pool. `lastLoginAt` is stamped on every
    /// unlock. The key reference is stored on first use only; a mismatch is
    /// reported but does not replace the recorded reference until
    /// [`VaultSession::adopt`] is called, so a mistyped passphrase cannot
    /// displace the real one.
    pub async fn unlock(
        store: &dyn CredentialStore,
        passphrase: SecretString,
        params: KdfParams,
    ) -> Result<Self> {
        let key = VaultKey::derive_blocking(passphrase, params).await?;
        let key_ref = key.key_ref()?;
        let now = Utc::now();

        let recorded = store.get_preferences().await?.encryption_key_ref;
        let status = compare_refs(recorded.as_deref(), &key_ref);

        let stored_ref = (status == KeyStatus::FirstUse).then_some(key_ref);
        store
            .set_preferences(PreferencesUpdate::default().login(stored_ref, now))
            .await?;

        match status {
            KeyStatus::Mismatch => warn!(kdf_version = params.version, "Unlocked with a key that differs from the recorded one"),
            _ => info!(kdf_version = params.version, ?status, "Vault unlocked"),
        }

        Ok(Self {
            key: Some(key),
            status,
            unlocked_at: now,
        })
    }

    /// Compare the session key with the currently recorded reference again
    ///
    /// Another session may have adopted a different key since this one was
    /// unlocked. Nothing is written.
    pub async fn refresh_status(&mut self, store: &dyn CredentialStore) -> Result<KeyStatus> {
        let key_ref = self.key()?.key_ref()?;
        let recorded = store.get_preferences().await?.encryption_key_ref;
        self.status = match compare_refs(recorded.as_deref(), &key_ref) {
            // Still unrecorded: nothing to disagree with
            KeyStatus::FirstUse => self.status,
            status => status,
        };
        Ok(self.status)
    }

    /// Record this session's key as the vault's current key
    pub async fn adopt(&mut self, store: &dyn CredentialStore) -> Result<()> {
        let key_ref = self.key()?.key_ref()?;
        store
            .set_preferences(PreferencesUpdate {
                encryption_key_ref: Some(Some(key_ref)),
                ..Default::default()
            })
            .await?;

        self.status = KeyStatus::Matches;
        info!("Adopted session key as the vault key");
        Ok(())
    }

    /// Swap in a new key after the vault was re-encrypted under it
    pub(crate) fn rekey(&mut self, key: VaultKey) {
        if let Some(mut old) = self.key.replace(key) {
            old.wipe();
        }
    }

    /// Session key, or an error once the session is locked
    pub fn key(&self) -> Result<&VaultKey> {
        self.key
            .as_ref()
            .ok_or_else(|| VaultError::InvalidInput("vault session is locked".to_string()))
    }

    pub fn status(&self) -> KeyStatus {
        self.status
    }

    pub fn unlocked_at(&self) -> DateTime<Utc> {
        self.unlocked_at
    }

    pub fn is_locked(&self) -> bool {
        self.key.is_none()
    }

    /// Wipe the key; the session is unusable afterwards
    pub fn lock(&mut self) {
        if let Some(mut key) = self.key.take() {
            key.wipe();
            info!("Vault locked");
        }
    }
}

fn compare_refs(recorded: Option<&str>, key_ref: &str) -> KeyStatus {
    match recorded {
        None => KeyStatus::FirstUse,
        Some(r) if r == key_ref => KeyStatus::Matches,
        Some(_) => KeyStatus::Mismatch,
    }
}
