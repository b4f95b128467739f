//! Error types for vault-core
//!
//! Every message is safe to log or show to a user: variants only ever carry
//! provider tags, key ids, lengths and version numbers, never key material,
//! IVs, ciphertext or any fragment of a decrypted secret.

use thiserror::Error;

use crate::provider::Provider;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid {provider} credential format")]
    Validation { provider: Provider },

    #[error("An identical {provider} credential is already stored")]
    Duplicate { provider: Provider },

    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Credential was encrypted with key derivation v{stored}, session uses v{current}")]
    KeyVersionMismatch { stored: u16, current: u16 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

impl VaultError {
    /// Stable discriminator for callers that map errors to UI states
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Duplicate { .. } => "duplicate",
            Self::NotFound(_) => "not_found",
            Self::Decryption(_) => "decryption",
            Self::KeyVersionMismatch { .. } => "key_version_mismatch",
            Self::Storage(_) => "storage",
            Self::InvalidInput(_) => "invalid_input",
            Self::KeyDerivation(_) => "key_derivation",
        }
    }

    /// Whether this error means the record exists but this session's key
    /// cannot open it
    pub fn is_undecryptable(&self) -> bool {
        matches!(self, Self::Decryption(_) | Self::KeyVersionMismatch { .. })
    }
}

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        // serde_json messages only include line/column and type names,
        // but records hold ciphertext, so keep just the category.
        Self::Storage(format!("malformed vault data ({:?})", e.classify()))
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::KeyDerivation(format!("background task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_stable() {
        assert_eq!(
            VaultError::Validation { provider: Provider::OpenAi }.kind(),
            "validation"
        );
        assert_eq!(VaultError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(
            VaultError::KeyVersionMismatch { stored: 2, current: 1 }.kind(),
            "key_version_mismatch"
        );
    }

    #[test]
    fn test_messages_name_the_provider_only() {
        let msg = VaultError::Duplicate { provider: Provider::Anthropic }.to_string();
        assert_eq!(msg, "An identical anthropic credential is already stored");
    }

    #[test]
    fn test_json_error_is_storage() {
        let err: VaultError = serde_json::from_str::<u32>("\"sk-secret\"").unwrap_err().into();
        assert_eq!(err.kind(), "storage");
        assert!(!err.to_string().contains("sk-secret"));
    }
}
