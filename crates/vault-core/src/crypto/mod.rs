//! Cryptographic primitives for the credential vault
//!
//! This module provides:
//! - PBKDF2-HMAC-SHA256 key derivation with per-purpose salts
//! - One-way credential fingerprints for duplicate detection
//! - AES-256-CBC + HMAC-SHA256 envelopes, with read support for older formats
//! - Secure memory handling with zeroize
//!
//! Everything here is a pure function of its inputs; no state is kept.

mod encryption;
mod key_derivation;
mod secure_memory;

pub use encryption::{decrypt, encrypt, envelope_format, Envelope, EnvelopeFormat};
pub use key_derivation::{
    derive_key, fingerprint, KdfParams, KeyPurpose, CURRENT_KDF_VERSION, KDF_V1_ITERATIONS,
};
pub use secure_memory::{SecretString, VaultKey};

#[cfg(test)]
pub(crate) use encryption::{encrypt_legacy, encrypt_untagged};
