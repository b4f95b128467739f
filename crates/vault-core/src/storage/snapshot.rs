//! In-memory state shared by the store backends
//!
//! Every mutation is a single method call on a snapshot, so sibling-clearing
//! and default-setting land together or not at all.
//!
//! The `*_if` variants are compare-and-swap writes: they apply only if the
//! records they were computed from are still exactly what the snapshot holds.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::credential::EncryptedCredential;
use crate::error::{Result, VaultError};
use crate::preferences::{PreferencesUpdate, UserPreferences};
use crate::provider::Provider;

/// Current on-disk format version
pub(crate) const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoreSnapshot {
    pub version: u32,
    /// Bumped on every successful write
    pub revision: u64,
    /// keyId -> record
    pub credentials: BTreeMap<String, EncryptedCredential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<UserPreferences>,
    /// Secondary index, rebuilt on load
    #[serde(skip)]
    by_provider: BTreeMap<Provider, BTreeSet<String>>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            revision: 0,
            credentials: BTreeMap::new(),
            preferences: None,
            by_provider: BTreeMap::new(),
        }
    }
}

fn oldest_first(mut records: Vec<EncryptedCredential>) -> Vec<EncryptedCredential> {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.key_id.cmp(&b.key_id))
    });
    records
}

impl StoreSnapshot {
    /// Rebuild the provider index after deserializing
    ///
    /// Also repairs files written by a racing writer that left more than one
    /// default: the oldest flagged record keeps the flag.
    pub fn reindex(&mut self) {
        self.by_provider.clear();
        for (key_id, record) in &self.credentials {
            self.by_provider
                .entry(record.provider)
                .or_default()
                .insert(key_id.clone());
        }

        for provider in self.by_provider.keys().copied().collect::<Vec<_>>() {
            let defaults: Vec<String> = oldest_first(self.records_for(provider))
                .into_iter()
                .filter(|r| r.is_default)
                .map(|r| r.key_id)
                .collect();
            for extra in defaults.iter().skip(1) {
                if let Some(record) = self.credentials.get_mut(extra) {
                    tracing::warn!(key_id = %extra, %provider, "Clearing duplicate default flag");
                    record.is_default = false;
                }
            }
        }
    }

    pub fn put(&mut self, mut record: EncryptedCredential, make_default: bool) {
        if make_default {
            if let Some(siblings) = self.by_provider.get(&record.provider) {
                for key_id in siblings {
                    if let Some(sibling) = self.credentials.get_mut(key_id) {
                        sibling.is_default = false;
                    }
                }
            }
        }

        // A replaced record may have moved provider
        if let Some(previous) = self.credentials.get(&record.key_id) {
            if previous.provider != record.provider {
                if let Some(ids) = self.by_provider.get_mut(&previous.provider) {
                    ids.remove(&record.key_id);
                }
            }
        }

        record.is_default = make_default;
        self.by_provider
            .entry(record.provider)
            .or_default()
            .insert(record.key_id.clone());
        self.credentials.insert(record.key_id.clone(), record);
    }

    fn check_provider(&self, provider: Provider, expected: &[EncryptedCredential]) -> Result<()> {
        if self.records_for(provider) == expected {
            Ok(())
        } else {
            Err(VaultError::Storage(format!(
                "concurrent modification: {} credentials changed since they were read",
                provider
            )))
        }
    }

    /// [`StoreSnapshot::put`] if the record's provider still holds `expected`
    pub fn put_if(
        &mut self,
        record: EncryptedCredential,
        make_default: bool,
        expected: &[EncryptedCredential],
    ) -> Result<()> {
        self.check_provider(record.provider, expected)?;
        self.put(record, make_default);
        Ok(())
    }

    /// [`StoreSnapshot::delete`] if the record's provider still holds
    /// `expected`
    pub fn delete_if(
        &mut self,
        key_id: &str,
        expected: &[EncryptedCredential],
    ) -> Result<Option<EncryptedCredential>> {
        let provider = match self
            .credentials
            .get(key_id)
            .or_else(|| expected.iter().find(|r| r.key_id == key_id))
        {
            Some(record) => record.provider,
            None => return Ok(None),
        };
        self.check_provider(provider, expected)?;
        Ok(self.delete(key_id))
    }

    /// Put every record in one step, if the whole store still holds
    /// `expected`
    ///
    /// Each record keeps its own `is_default`.
    pub fn replace_all_if(
        &mut self,
        records: Vec<EncryptedCredential>,
        expected: &[EncryptedCredential],
    ) -> Result<()> {
        if self.get_all() != expected {
            return Err(VaultError::Storage(
                "concurrent modification: vault changed since it was read".to_string(),
            ));
        }
        for record in records {
            let make_default = record.is_default;
            self.put(record, make_default);
        }
        Ok(())
    }

    pub fn get_all(&self) -> Vec<EncryptedCredential> {
        oldest_first(self.credentials.values().cloned().collect())
    }

    pub fn get_by_id(&self, key_id: &str) -> Option<EncryptedCredential> {
        self.credentials.get(key_id).cloned()
    }

    pub fn records_for(&self, provider: Provider) -> Vec<EncryptedCredential> {
        let records = self
            .by_provider
            .get(&provider)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.credentials.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        oldest_first(records)
    }

    pub fn get_default(&self, provider: Provider) -> Option<EncryptedCredential> {
        self.by_provider.get(&provider).and_then(|ids| {
            ids.iter()
                .filter_map(|id| self.credentials.get(id))
                .find(|r| r.is_default)
                .cloned()
        })
    }

    pub fn delete(&mut self, key_id: &str) -> Option<EncryptedCredential> {
        let removed = self.credentials.remove(key_id)?;
        if let Some(ids) = self.by_provider.get_mut(&removed.provider) {
            ids.remove(key_id);
            if ids.is_empty() {
                self.by_provider.remove(&removed.provider);
            }
        }
        Some(removed)
    }

    pub fn preferences(&self) -> UserPreferences {
        self.preferences.clone().unwrap_or_default()
    }

    pub fn set_preferences(&mut self, update: PreferencesUpdate) -> UserPreferences {
        let mut prefs = self.preferences();
        prefs.apply(update);
        self.preferences = Some(prefs.clone());
        prefs
    }

    /// Number of defaults per provider, for invariant checks
    #[cfg(test)]
    pub fn default_count(&self, provider: Provider) -> usize {
        self.records_for(provider).iter().filter(|r| r.is_default).count()
    }
}
