//! Secure memory handling with automatic zeroization

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::encryption::compute_mac;
use super::key_derivation::{derive_key, KdfParams, KeyPurpose};
use crate::error::{Result, VaultError};

/// Session key material derived from the user's passphrase - zeroed on drop
///
/// One instance is the explicit context every vault call that touches
/// ciphertext receives. Dropping it (or calling [`VaultKey::wipe`]) clears
/// all three subkeys.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    /// General-purpose encryption key (also the legacy envelope passphrase)
    encryption: [u8; 32],
    /// AES-256 key for CBC envelopes
    aes: [u8; 32],
    /// HMAC-SHA256 key authenticating tagged envelopes
    authentication: [u8; 32],
    #[zeroize(skip)]
    params: KdfParams,
}

impl VaultKey {
    /// Derive every subkey from a passphrase
    ///
    /// Runs the KDF once per purpose, so this is deliberately slow. Call it
    /// from a blocking context (see [`VaultKey::derive_blocking`]).
    pub fn derive(passphrase: &str, params: KdfParams) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(VaultError::InvalidInput("passphrase must not be empty".to_string()));
        }

        Ok(Self {
            encryption: derive_key(passphrase, KeyPurpose::Encryption, params)?,
            aes: derive_key(passphrase, KeyPurpose::AesSubkey, params)?,
            authentication: derive_key(passphrase, KeyPurpose::Authentication, params)?,
            params,
        })
    }

    /// Derive on tokio's blocking pool so the caller's executor stays responsive
    pub async fn derive_blocking(passphrase: SecretString, params: KdfParams) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::derive(passphrase.expose(), params)).await?
    }

    /// Build a key from already-derived subkeys
    pub fn from_parts(
        encryption: [u8; 32],
        aes: [u8; 32],
        authentication: [u8; 32],
        params: KdfParams,
    ) -> Self {
        Self {
            encryption,
            aes,
            authentication,
            params,
        }
    }

    pub(crate) fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption
    }

    pub(crate) fn aes_key(&self) -> &[u8; 32] {
        &self.aes
    }

    pub(crate) fn authentication_key(&self) -> &[u8; 32] {
        &self.authentication
    }

    /// KDF parameters this key was derived with
    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Short non-secret check value identifying this key
    ///
    /// Stored in preferences so a later session can tell a changed passphrase
    /// apart from corrupted records.
    pub fn key_ref(&self) -> Result<String> {
        let digest = compute_mac(&self.authentication, b"byok-vault:key-ref")?;
        Ok(format!("v{}-{}", self.params.version, hex::encode(&digest[..8])))
    }

    /// Explicitly clear the key material before the value is dropped
    pub fn wipe(&mut self) {
        self.zeroize();
    }
}

impl Clone for VaultKey {
    fn clone(&self) -> Self {
        Self {
            encryption: self.encryption,
            aes: self.aes,
            authentication: self.authentication,
            params: self.params,
        }
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKey")
            .field("key", &"[REDACTED]")
            .field("kdf_version", &self.params.version)
            .finish()
    }
}

/// Decrypted secret value - automatically zeroed when dropped
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    /// Create a new secret string
    pub fn new(value: String) -> Self {
        Self { value }
    }

    /// Get the secret value (use carefully)
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Length in bytes, safe to display
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretString")
            .field("value", &"[REDACTED]")
            .finish()
    }
}
