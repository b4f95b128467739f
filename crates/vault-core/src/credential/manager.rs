//! Credential manager: the only component with business rules
//!
//! Invariants kept here:
//! - a raw secret is validated before it is ever encrypted
//! - the same secret is never stored twice for a provider (fingerprint check)
//! - each provider has at most one default (delegated to the store's atomic
//!   `put`, serialised per provider by the writer locks below)
//!
//! Writes for one provider go through that provider's writer lock, so within
//! a process the read-check-write sequences (dedup then insert, read then
//! replace) cannot interleave. Every write is conditional on the records it
//! was computed from (`put_if`, `delete_if`, `replace_all_if`), so a writer
//! in another process surfaces as a storage error instead of a lost update.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{
    CredentialListing, DecryptedCredential, EncryptedCredential, LockReason, LockedCredential,
};
use crate::crypto::{decrypt, encrypt, fingerprint, SecretString, VaultKey};
use crate::error::{Result, VaultError};
use crate::provider::{validate_format, Provider};
use crate::settings::{DefaultPromotion, VaultSettings};
use crate::stats::UsageStats;
use crate::storage::CredentialStore;

/// Credential manager
pub struct CredentialManager {
    /// Storage backend
    store: Arc<dyn CredentialStore>,
    /// Policy applied when a default is deleted
    promotion: DefaultPromotion,
    /// Expiry window for records without `expires_at`
    max_age: Duration,
    /// One single-writer lock per provider
    writers: HashMap<Provider, Arc<Mutex<()>>>,
}

impl CredentialManager {
    /// Create a manager with default settings
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self::with_settings(store, &VaultSettings::default())
    }

    /// Create a manager configured from settings
    pub fn with_settings(store: Arc<dyn CredentialStore>, settings: &VaultSettings) -> Self {
        let writers = Provider::ALL
            .into_iter()
            .map(|p| (p, Arc::new(Mutex::new(()))))
            .collect();

        Self {
            store,
            promotion: settings.default_promotion,
            max_age: settings.credential_max_age(),
            writers,
        }
    }

    /// Override the default-promotion policy
    pub fn with_default_promotion(mut self, policy: DefaultPromotion) -> Self {
        self.promotion = policy;
        self
    }

    pub fn default_promotion(&self) -> DefaultPromotion {
        self.promotion
    }

    /// Storage backend in use
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    async fn lock_provider(&self, provider: Provider) -> OwnedMutexGuard<()> {
        // Every variant is inserted at construction
        self.writers[&provider].clone().lock_owned().await
    }

    async fn require(&self, key_id: &str) -> Result<EncryptedCredential> {
        self.store
            .get_by_id(key_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(key_id.to_string()))
    }

    /// Fetch a record and hold its provider's writer lock
    ///
    /// The record and its siblings are re-read under the lock; the siblings
    /// are the expected state for the caller's conditional write.
    async fn lock_record(&self, key_id: &str) -> Result<LockedRecord> {
        let provider = self.require(key_id).await?.provider;
        let guard = self.lock_provider(provider).await;
        let siblings = self.store.get_by_provider(provider).await?;
        let record = siblings
            .iter()
            .find(|r| r.key_id == key_id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(key_id.to_string()))?;
        Ok(LockedRecord {
            _guard: guard,
            record,
            siblings,
        })
    }

    /// Check a raw secret against the provider's format rule
    pub fn validate_format(provider: Provider, raw: &str) -> bool {
        validate_format(provider, raw)
    }

    /// Validate, dedup, encrypt and store a new credential
    ///
    /// Dedup decrypts and fingerprints every existing record for `provider`:
    /// n KDF runs per add. That is acceptable only because a user holds a
    /// handful of credentials per provider. The work runs on the blocking
    /// pool. The first record for a provider becomes its default.
    ///
    /// If any existing record for `provider` cannot be opened with `key`
    /// the add is refused with that record's `Decryption` or
    /// `KeyVersionMismatch` error: the check cannot be made, and a typo'd
    /// passphrase must not be able to store a second copy.
    pub async fn add_credential(
        &self,
        provider: Provider,
        raw: &str,
        key: &VaultKey,
    ) -> Result<EncryptedCredential> {
        if !validate_format(provider, raw) {
            return Err(VaultError::Validation { provider });
        }

        let _guard = self.lock_provider(provider).await;

        let existing = self.store.get_by_provider(provider).await?;
        let make_default = existing.is_empty();

        let secret = SecretString::from(raw);
        let key = key.clone();
        let siblings = existing.clone();
        let encrypted_key = tokio::task::spawn_blocking(move || -> Result<String> {
            ensure_unique(provider, secret.expose(), &siblings, None, &key)?;
            encrypt(secret.expose(), &key)
        })
        .await??;

        let mut record = EncryptedCredential::new(provider, encrypted_key);
        while self.store.get_by_id(&record.key_id).await?.is_some() {
            record.key_id = Uuid::new_v4().to_string();
        }

        self.store
            .put_if(record.clone(), make_default, &existing)
            .await?;
        record.is_default = make_default;

        info!(key_id = %record.key_id, %provider, is_default = make_default, "Added credential");
        Ok(record)
    }

    /// Decrypt every record with the session key
    ///
    /// Records the key cannot open are reported in `locked` rather than
    /// failing the whole call.
    pub async fn get_credentials(&self, key: &VaultKey) -> Result<CredentialListing> {
        let mut listing = CredentialListing::default();

        for record in self.store.get_all().await? {
            match decrypt(&record.encrypted_key, key) {
                Ok(secret) => listing
                    .credentials
                    .push(DecryptedCredential::new(&record, secret)),
                Err(e) => {
                    let reason = match e {
                        VaultError::KeyVersionMismatch { stored, .. } => {
                            LockReason::NeedsMigration {
                                stored_version: stored,
                            }
                        }
                        _ => LockReason::NeedsPassphrase,
                    };
                    warn!(key_id = %record.key_id, provider = %record.provider, error = %e, "Skipping undecryptable credential");
                    listing.locked.push(LockedCredential {
                        key_id: record.key_id,
                        provider: record.provider,
                        is_default: record.is_default,
                        reason,
                    });
                }
            }
        }

        debug!(
            decrypted = listing.credentials.len(),
            locked = listing.locked.len(),
            "Listed credentials"
        );
        Ok(listing)
    }

    /// Stored records without decrypting anything
    pub async fn records(&self) -> Result<Vec<EncryptedCredential>> {
        self.store.get_all().await
    }

    /// Decrypt the provider's default credential for one request
    ///
    /// The caller must drop the result when the request ends and report a
    /// successful call through [`CredentialManager::record_usage`].
    pub async fn get_default_credential(
        &self,
        provider: Provider,
        key: &VaultKey,
    ) -> Result<DecryptedCredential> {
        let record = self
            .store
            .get_default(provider)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("no default {} credential", provider)))?;

        let secret = decrypt(&record.encrypted_key, key)?;
        debug!(key_id = %record.key_id, %provider, "Decrypted default credential");
        Ok(DecryptedCredential::new(&record, secret))
    }

    /// Replace a credential's secret
    ///
    /// Builds a complete new record (same key id, creation time, default
    /// flag and usage metadata) and swaps it in with one store write, so no
    /// reader ever sees fresh metadata over a stale payload.
    pub async fn update_credential(
        &self,
        key_id: &str,
        new_raw: &str,
        key: &VaultKey,
    ) -> Result<EncryptedCredential> {
        let LockedRecord {
            _guard,
            record: current,
            siblings: expected,
        } = self.lock_record(key_id).await?;
        let provider = current.provider;

        if !validate_format(provider, new_raw) {
            return Err(VaultError::Validation { provider });
        }

        let siblings = expected.clone();
        let secret = SecretString::from(new_raw);
        let key = key.clone();
        let exclude = current.key_id.clone();
        let encrypted_key = tokio::task::spawn_blocking(move || -> Result<String> {
            ensure_unique(provider, secret.expose(), &siblings, Some(exclude.as_str()), &key)?;
            encrypt(secret.expose(), &key)
        })
        .await??;

        let replacement = EncryptedCredential {
            provider,
            encrypted_key,
            key_id: current.key_id.clone(),
            created_at: current.created_at,
            last_used: current.last_used,
            expires_at: current.expires_at,
            is_default: current.is_default,
        };
        self.store
            .put_if(replacement.clone(), current.is_default, &expected)
            .await?;

        info!(%key_id, %provider, "Updated credential");
        Ok(replacement)
    }

    /// Remove a credential
    ///
    /// If it was the provider's default, the configured [`DefaultPromotion`]
    /// decides whether another record takes over.
    pub async fn delete_credential(&self, key_id: &str) -> Result<()> {
        let locked = self.lock_record(key_id).await?;
        let provider = locked.record.provider;

        let removed = self
            .store
            .delete_if(key_id, &locked.siblings)
            .await?
            .ok_or_else(|| VaultError::NotFound(key_id.to_string()))?;

        info!(%key_id, %provider, "Deleted credential");

        if removed.is_default {
            self.promote_after_delete(provider).await?;
        }
        Ok(())
    }

    async fn promote_after_delete(&self, provider: Provider) -> Result<()> {
        let remaining = self.store.get_by_provider(provider).await?;

        let candidate = match self.promotion {
            DefaultPromotion::Never => None,
            DefaultPromotion::MostRecentlyCreated => {
                remaining.iter().max_by_key(|r| r.created_at)
            }
            DefaultPromotion::MostRecentlyUsed => remaining
                .iter()
                .max_by_key(|r| (r.last_used.is_some(), r.last_used, r.created_at)),
        };

        match candidate {
            Some(record) => {
                info!(key_id = %record.key_id, %provider, "Promoted credential to default");
                self.store.put_if(record.clone(), true, &remaining).await
            }
            None => {
                debug!(%provider, policy = ?self.promotion, "Provider left without a default");
                Ok(())
            }
        }
    }

    /// Make a credential its provider's default
    pub async fn set_default(&self, key_id: &str) -> Result<()> {
        let locked = self.lock_record(key_id).await?;
        let provider = locked.record.provider;

        self.store
            .put_if(locked.record.clone(), true, &locked.siblings)
            .await?;

        info!(%key_id, %provider, "Set default credential");
        Ok(())
    }

    /// Set or clear an explicit expiry
    pub async fn set_expiry(&self, key_id: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let locked = self.lock_record(key_id).await?;
        let record = EncryptedCredential {
            expires_at,
            ..locked.record.clone()
        };

        self.store
            .put_if(record, locked.record.is_default, &locked.siblings)
            .await?;

        debug!(%key_id, ?expires_at, "Updated credential expiry");
        Ok(())
    }

    /// Note a successful use of a credential
    ///
    /// Only touches `last_used`; a no-op when usage tracking is disabled in
    /// preferences.
    pub async fn record_usage(&self, key_id: &str) -> Result<()> {
        if !self.store.get_preferences().await?.usage_tracking_enabled {
            debug!(%key_id, "Usage tracking disabled, not recording");
            return Ok(());
        }

        let locked = self.lock_record(key_id).await?;
        let record = EncryptedCredential {
            last_used: Some(Utc::now()),
            ..locked.record.clone()
        };

        self.store
            .put_if(record, locked.record.is_default, &locked.siblings)
            .await?;

        debug!(%key_id, "Recorded credential usage");
        Ok(())
    }

    /// Re-encrypt every record `old` can open under `new`
    ///
    /// Used for passphrase changes and KDF version migrations. Records `old`
    /// cannot open are left as they are. All replacements are committed in
    /// one store write while every provider's writer lock is held, so the
    /// vault is never left half under `old` and half under `new`. Returns
    /// the number re-encrypted.
    pub async fn reencrypt(&self, old: &VaultKey, new: &VaultKey) -> Result<usize> {
        let mut guards = Vec::with_capacity(Provider::ALL.len());
        for provider in Provider::ALL {
            guards.push(self.lock_provider(provider).await);
        }

        let current = self.store.get_all().await?;
        let mut replacements = Vec::with_capacity(current.len());
        for record in &current {
            let secret = match decrypt(&record.encrypted_key, old) {
                Ok(secret) => secret,
                Err(e) if e.is_undecryptable() => {
                    warn!(key_id = %record.key_id, provider = %record.provider, "Leaving undecryptable credential as is");
                    continue;
                }
                Err(e) => return Err(e),
            };

            replacements.push(EncryptedCredential {
                encrypted_key: encrypt(secret.expose(), new)?,
                ..record.clone()
            });
        }

        let migrated = replacements.len();
        if migrated > 0 {
            self.store.replace_all_if(replacements, &current).await?;
        }

        info!(migrated, "Re-encrypted credentials");
        Ok(migrated)
    }

    /// Counts, last-used times and expired ids as of now
    pub async fn get_usage_stats(&self) -> Result<UsageStats> {
        let records = self.store.get_all().await?;
        Ok(UsageStats::compute(&records, Utc::now(), self.max_age))
    }
}

/// A record read under its provider's writer lock, with the provider's
/// records at that moment
struct LockedRecord {
    _guard: OwnedMutexGuard<()>,
    record: EncryptedCredential,
    siblings: Vec<EncryptedCredential>,
}

/// Fail with `Duplicate` if `raw` matches any record in `existing` other
/// than `exclude`
///
/// A record the key cannot open fails the check with its decryption error:
/// without its own passphrase it cannot be compared.
fn ensure_unique(
    provider: Provider,
    raw: &str,
    existing: &[EncryptedCredential],
    exclude: Option<&str>,
    key: &VaultKey,
) -> Result<()> {
    if existing
        .iter()
        .all(|r| Some(r.key_id.as_str()) == exclude)
    {
        return Ok(());
    }

    let params = key.params();
    let candidate = fingerprint(raw, params)?;

    for record in existing {
        if Some(record.key_id.as_str()) == exclude {
            continue;
        }

        match decrypt(&record.encrypted_key, key) {
            Ok(stored) => {
                if fingerprint(stored.expose(), params)? == candidate {
                    return Err(VaultError::Duplicate { provider });
                }
            }
            Err(e) => {
                if e.is_undecryptable() {
                    warn!(key_id = %record.key_id, %provider, "Cannot compare against undecryptable credential");
                }
                return Err(e);
            }
        }
    }

    Ok(())
}
