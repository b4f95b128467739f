//! # vault-core
//!
//! Client-resident vault for user-supplied AI provider API keys:
//! - PBKDF2 key derivation and AES-256-CBC + HMAC envelopes
//! - Per-provider format validation and duplicate detection
//! - File-backed credential store with atomic, revision-checked writes
//! - Credential management with zeroize-on-drop secrets

pub mod credential;
pub mod crypto;
pub mod error;
pub mod preferences;
pub mod provider;
pub mod session;
pub mod settings;
pub mod stats;
pub mod storage;
mod vault;

pub use credential::{
    CredentialListing, CredentialManager, DecryptedCredential, EncryptedCredential, LockReason,
    LockedCredential,
};
pub use crypto::{decrypt, encrypt, fingerprint, KdfParams, SecretString, VaultKey};
pub use error::{Result, VaultError};
pub use preferences::{PreferencesUpdate, UserPreferences};
pub use provider::{Provider, ProviderConfig};
pub use session::{KeyStatus, VaultSession};
pub use settings::{DefaultPromotion, SettingsManager, VaultSettings};
pub use stats::UsageStats;
pub use storage::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use vault::Vault;
