//! JSON file storage backend
//!
//! Stores every record (already encrypted by the manager) plus preferences in
//! a single `vault.json` in the user's data directory.
//!
//! Each write takes an exclusive advisory lock on `vault.json.lock`, reloads
//! the file, applies one mutation, and replaces the file atomically through
//! a temp file and rename before releasing the lock. Writers in other
//! processes therefore never interleave between the read and the rename.
//! Conditional writes (`put_if` and friends) compare against the freshly
//! loaded state under that lock.

use async_trait::async_trait;
use directories::ProjectDirs;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use super::snapshot::{StoreSnapshot, SNAPSHOT_VERSION};
use super::CredentialStore;
use crate::credential::EncryptedCredential;
use crate::error::{Result, VaultError};
use crate::preferences::{PreferencesUpdate, UserPreferences};
use crate::provider::Provider;

const VAULT_FILE: &str = "vault.json";
const LOCK_FILE: &str = "vault.json.lock";

/// File-backed credential store
pub struct FileCredentialStore {
    /// Directory for storage files
    storage_dir: PathBuf,
    /// Last snapshot read from or written to disk; its write lock is the
    /// in-process single-writer gate
    state: RwLock<StoreSnapshot>,
}

impl FileCredentialStore {
    /// Create a store in the default data directory
    pub fn new() -> Result<Self> {
        Self::with_dir(Self::default_dir()?)
    }

    /// Create with a custom storage directory
    pub fn with_dir(storage_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&storage_dir)?;

        debug!("File credential store initialized at: {:?}", storage_dir);

        Ok(Self {
            storage_dir,
            state: RwLock::new(StoreSnapshot::default()),
        })
    }

    /// Get the default storage directory
    pub fn default_dir() -> Result<PathBuf> {
        ProjectDirs::from("dev", "byok-vault", "byok-vault")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| VaultError::Storage("Could not determine data directory".to_string()))
    }

    /// Get the storage directory path
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn vault_file_path(&self) -> PathBuf {
        self.storage_dir.join(VAULT_FILE)
    }

    /// Read the file, or an empty snapshot if it does not exist yet
    async fn read_file(&self) -> Result<StoreSnapshot> {
        let path = self.vault_file_path();

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreSnapshot::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut snapshot: StoreSnapshot = serde_json::from_str(&contents)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(VaultError::Storage(format!(
                "vault file version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        snapshot.reindex();
        Ok(snapshot)
    }

    /// Reload from disk and refresh the cached snapshot
    pub async fn load(&self) -> Result<()> {
        let snapshot = self.read_file().await?;
        let mut state = self.state.write().await;
        debug!(
            revision = snapshot.revision,
            "Loaded {} credentials from storage",
            snapshot.credentials.len()
        );
        *state = snapshot;
        Ok(())
    }

    async fn current(&self) -> Result<StoreSnapshot> {
        let snapshot = self.read_file().await?;
        *self.state.write().await = snapshot.clone();
        Ok(snapshot)
    }

    /// Take the cross-process write lock
    ///
    /// Released when the returned file is dropped.
    async fn lock_file(&self) -> Result<File> {
        let lock_path = self.storage_dir.join(LOCK_FILE);
        tokio::task::spawn_blocking(move || -> Result<File> {
            let lock_file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            lock_file.lock_exclusive()?;
            Ok(lock_file)
        })
        .await
        .map_err(|e| VaultError::Storage(format!("vault lock task failed: {}", e)))?
    }

    /// Apply one mutation as a read-modify-write of the file
    ///
    /// `op` returns its output and whether the snapshot changed.
    async fn mutate<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut StoreSnapshot) -> (T, bool) + Send,
        T: Send,
    {
        let mut state = self.state.write().await;
        let _lock = self.lock_file().await?;

        let mut snapshot = self.read_file().await?;
        let (output, changed) = op(&mut snapshot);
        if changed {
            snapshot.revision += 1;
            self.write_file(&snapshot).await?;
        }

        *state = snapshot;
        Ok(output)
    }

    /// [`FileCredentialStore::mutate`] for operations that may refuse; a
    /// refused operation writes nothing
    async fn try_mutate<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut StoreSnapshot) -> Result<T> + Send,
        T: Send,
    {
        self.mutate(|snapshot| match op(snapshot) {
            Ok(output) => (Ok(output), true),
            Err(e) => (Err(e), false),
        })
        .await?
    }

    /// Atomically replace the file; the caller holds the write lock
    async fn write_file(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let contents = serde_json::to_string_pretty(snapshot)?;
        let path = self.vault_file_path();
        let temp_path = self
            .storage_dir
            .join(format!("{}.{}.tmp", VAULT_FILE, uuid::Uuid::new_v4()));

        tokio::fs::write(&temp_path, &contents).await?;
        if let Err(e) = restrict_permissions(&temp_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        tokio::fs::rename(&temp_path, &path).await?;

        debug!(
            revision = snapshot.revision,
            "Saved {} credentials to storage",
            snapshot.credentials.len()
        );
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn put(&self, record: EncryptedCredential, make_default: bool) -> Result<()> {
        let key_id = record.key_id.clone();
        self.mutate(move |snapshot| {
            snapshot.put(record, make_default);
            ((), true)
        })
        .await?;

        debug!(%key_id, make_default, "Stored credential");
        Ok(())
    }

    async fn put_if(
        &self,
        record: EncryptedCredential,
        make_default: bool,
        expected: &[EncryptedCredential],
    ) -> Result<()> {
        let key_id = record.key_id.clone();
        self.try_mutate(move |snapshot| snapshot.put_if(record, make_default, expected))
            .await?;

        debug!(%key_id, make_default, "Stored credential");
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<EncryptedCredential>> {
        Ok(self.current().await?.get_all())
    }

    async fn get_by_id(&self, key_id: &str) -> Result<Option<EncryptedCredential>> {
        Ok(self.current().await?.get_by_id(key_id))
    }

    async fn get_by_provider(&self, provider: Provider) -> Result<Vec<EncryptedCredential>> {
        Ok(self.current().await?.records_for(provider))
    }

    async fn get_default(&self, provider: Provider) -> Result<Option<EncryptedCredential>> {
        Ok(self.current().await?.get_default(provider))
    }

    async fn delete(&self, key_id: &str) -> Result<Option<EncryptedCredential>> {
        let removed = self
            .mutate(|snapshot| {
                let removed = snapshot.delete(key_id);
                let changed = removed.is_some();
                (removed, changed)
            })
            .await?;

        if removed.is_some() {
            debug!(%key_id, "Deleted credential");
        }
        Ok(removed)
    }

    async fn delete_if(
        &self,
        key_id: &str,
        expected: &[EncryptedCredential],
    ) -> Result<Option<EncryptedCredential>> {
        let removed = self
            .mutate(|snapshot| match snapshot.delete_if(key_id, expected) {
                Ok(removed) => {
                    let changed = removed.is_some();
                    (Ok(removed), changed)
                }
                Err(e) => (Err(e), false),
            })
            .await??;

        if removed.is_some() {
            debug!(%key_id, "Deleted credential");
        }
        Ok(removed)
    }

    async fn replace_all_if(
        &self,
        records: Vec<EncryptedCredential>,
        expected: &[EncryptedCredential],
    ) -> Result<()> {
        let count = records.len();
        self.try_mutate(move |snapshot| snapshot.replace_all_if(records, expected))
            .await?;

        debug!(count, "Replaced credentials");
        Ok(())
    }

    async fn get_preferences(&self) -> Result<UserPreferences> {
        Ok(self.current().await?.preferences())
    }

    async fn set_preferences(&self, update: PreferencesUpdate) -> Result<UserPreferences> {
        self.mutate(move |snapshot| (snapshot.set_preferences(update), true))
            .await
    }

    fn backend_name(&self) -> &'static str {
        "File Storage"
    }
}
