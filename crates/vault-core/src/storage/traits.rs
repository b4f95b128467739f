//! Storage trait definitions

use async_trait::async_trait;

use crate::credential::EncryptedCredential;
use crate::error::Result;
use crate::preferences::{PreferencesUpdate, UserPreferences};
use crate::provider::Provider;

/// Durable home for encrypted credential records and the preferences
/// singleton
///
/// Implementations only ever see ciphertext. They enforce the structural
/// invariants (unique `key_id`, at most one default per provider) but no
/// business rules.
///
/// The `*_if` writes take the records the caller computed its change from
/// and fail with a storage error, writing nothing, if those records have
/// changed since. Callers that read then write use them so a stale view can
/// never undo a newer write made by another handle or process.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace a record by `key_id`
    ///
    /// With `make_default`, every other record of the same provider loses its
    /// default flag in the same atomic write. The stored record's
    /// `is_default` always equals `make_default`.
    async fn put(&self, record: EncryptedCredential, make_default: bool) -> Result<()>;

    /// [`CredentialStore::put`], if the record's provider still holds
    /// exactly `expected` (as returned by `get_by_provider`)
    async fn put_if(
        &self,
        record: EncryptedCredential,
        make_default: bool,
        expected: &[EncryptedCredential],
    ) -> Result<()>;

    /// All records, oldest first
    async fn get_all(&self) -> Result<Vec<EncryptedCredential>>;

    async fn get_by_id(&self, key_id: &str) -> Result<Option<EncryptedCredential>>;

    /// Records for one provider via the provider index, oldest first
    async fn get_by_provider(&self, provider: Provider) -> Result<Vec<EncryptedCredential>>;

    /// The provider's flagged default, if any
    async fn get_default(&self, provider: Provider) -> Result<Option<EncryptedCredential>>;

    /// Remove a record, returning it if it existed
    async fn delete(&self, key_id: &str) -> Result<Option<EncryptedCredential>>;

    /// [`CredentialStore::delete`], if the record's provider still holds
    /// exactly `expected`
    async fn delete_if(
        &self,
        key_id: &str,
        expected: &[EncryptedCredential],
    ) -> Result<Option<EncryptedCredential>>;

    /// Replace many records in one atomic write, if the whole store still
    /// holds exactly `expected` (as returned by `get_all`)
    ///
    /// Each record keeps its own `is_default`.
    async fn replace_all_if(
        &self,
        records: Vec<EncryptedCredential>,
        expected: &[EncryptedCredential],
    ) -> Result<()>;

    /// Stored preferences, or the documented defaults on first read
    async fn get_preferences(&self) -> Result<UserPreferences>;

    /// Merge a partial update and return the result
    async fn set_preferences(&self, update: PreferencesUpdate) -> Result<UserPreferences>;

    /// Get a human-readable name for this storage backend
    fn backend_name(&self) -> &'static str;
}
