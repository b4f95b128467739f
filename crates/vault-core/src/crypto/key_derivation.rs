//! Password-based key derivation using PBKDF2-HMAC-SHA256
//!
//! Each purpose gets its own fixed salt with the KDF version folded in, so the
//! same passphrase yields unrelated keys for encryption, the AES subkey, the
//! MAC key and fingerprints. Changing the iteration count or salts is a
//! versioned migration: bump [`CURRENT_KDF_VERSION`] and add a row to
//! [`KdfParams::for_version`].

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::{Result, VaultError};

/// KDF version written into every new envelope
pub const CURRENT_KDF_VERSION: u16 = 1;

/// PBKDF2 iterations for version 1
pub const KDF_V1_ITERATIONS: u32 = 600_000;

/// What a derived key is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// General encryption key
    Encryption,
    /// AES-256 subkey for CBC envelopes
    AesSubkey,
    /// HMAC key for envelope authentication
    Authentication,
    /// One-way fingerprints of raw credentials
    Fingerprint,
}

impl KeyPurpose {
    fn label(&self) -> &'static str {
        match self {
            KeyPurpose::Encryption => "encryption",
            KeyPurpose::AesSubkey => "aes-subkey",
            KeyPurpose::Authentication => "authentication",
            KeyPurpose::Fingerprint => "fingerprint",
        }
    }

    /// Fixed salt for this purpose at a given KDF version
    pub fn salt(&self, version: u16) -> String {
        format!("byok-vault:{}:v{}", self.label(), version)
    }
}

/// Parameters for PBKDF2 key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Version tag recorded in envelopes
    pub version: u16,
    /// PBKDF2 iteration count
    pub iterations: u32,
}

impl KdfParams {
    /// Explicit parameters (tests and migrations)
    pub const fn new(version: u16, iterations: u32) -> Self {
        Self { version, iterations }
    }

    /// Parameters for the current release
    pub const fn current() -> Self {
        Self::new(CURRENT_KDF_VERSION, KDF_V1_ITERATIONS)
    }

    /// Look up the released parameters for a version
    pub fn for_version(version: u16) -> Option<Self> {
        match version {
            1 => Some(Self::new(1, KDF_V1_ITERATIONS)),
            _ => None,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::current()
    }
}

/// Derive a 256-bit key for `purpose` from a secret
///
/// Deterministic and intentionally slow: hundreds of milliseconds at the
/// current iteration count.
pub fn derive_key(secret: &str, purpose: KeyPurpose, params: KdfParams) -> Result<[u8; 32]> {
    if params.iterations == 0 {
        return Err(VaultError::KeyDerivation(
            "iteration count must be positive".to_string(),
        ));
    }

    let salt = purpose.salt(params.version);
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt.as_bytes(), params.iterations, &mut out);
    Ok(out)
}

/// One-way fingerprint of a raw credential, for equality checks only
pub fn fingerprint(raw_secret: &str, params: KdfParams) -> Result<String> {
    let mut digest = derive_key(raw_secret, KeyPurpose::Fingerprint, params)?;
    let encoded = hex::encode(digest);
    zeroize::Zeroize::zeroize(&mut digest);
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams::new(1, 1_000);

    #[test]
    fn test_derive_key_deterministic() {
        let k1 = derive_key("passphrase", KeyPurpose::Encryption, FAST).unwrap();
        let k2 = derive_key("passphrase", KeyPurpose::Encryption, FAST).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_purposes_are_domain_separated() {
        let enc = derive_key("passphrase", KeyPurpose::Encryption, FAST).unwrap();
        let aes = derive_key("passphrase", KeyPurpose::AesSubkey, FAST).unwrap();
        let fp = derive_key("passphrase", KeyPurpose::Fingerprint, FAST).unwrap();
        assert_ne!(enc, aes);
        assert_ne!(enc, fp);
        assert_ne!(aes, fp);
    }

    #[test]
    fn test_version_changes_output() {
        let v1 = derive_key("passphrase", KeyPurpose::Encryption, KdfParams::new(1, 1_000)).unwrap();
        let v2 = derive_key("passphrase", KeyPurpose::Encryption, KdfParams::new(2, 1_000)).unwrap();
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_known_salt_strings() {
        assert_eq!(KeyPurpose::Encryption.salt(1), "byok-vault:encryption:v1");
        assert_eq!(KeyPurpose::AesSubkey.salt(1), "byok-vault:aes-subkey:v1");
        assert_eq!(KeyPurpose::Fingerprint.salt(3), "byok-vault:fingerprint:v3");
    }

    #[test]
    fn test_current_params() {
        let params = KdfParams::current();
        assert_eq!(params.version, 1);
        assert_eq!(params.iterations, 600_000);
        assert_eq!(KdfParams::for_version(1), Some(params));
        assert_eq!(KdfParams::for_version(9), None);
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let err = derive_key("x", KeyPurpose::Encryption, KdfParams::new(1, 0)).unwrap_err();
        assert_eq!(err.kind(), "key_derivation");
    }

    #[test]
    fn test_fingerprint() {
        let a = fingerprint("sk-aaaaaaaaaaaaaaaaaaaaaaaa", FAST).unwrap();
        let b = fingerprint("sk-aaaaaaaaaaaaaaaaaaaaaaaa", FAST).unwrap();
        let c = fingerprint("sk-bbbbbbbbbbbbbbbbbbbbbbbb", FAST).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
