//! Credential type definitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::SecretString;
use crate::provider::Provider;

/// Trailing characters revealed by [`DecryptedCredential::masked`]
const MASK_TAIL: usize = 4;
/// Shorter secrets are masked completely
const MASK_MIN_LEN: usize = 16;

/// Persisted credential record (encrypted)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedCredential {
    /// Provider this credential authenticates against
    pub provider: Provider,

    /// Envelope holding the encrypted secret
    pub encrypted_key: String,

    /// Globally unique identifier
    pub key_id: String,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last time the generation layer reported a successful use
    #[serde(default, rename = "lastUsed", skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,

    /// Explicit expiry, overriding the max-age heuristic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Whether this is the provider's default credential
    #[serde(default)]
    pub is_default: bool,
}

impl EncryptedCredential {
    /// Create a fresh record for an already-encrypted payload
    pub fn new(provider: Provider, encrypted_key: String) -> Self {
        Self {
            provider,
            encrypted_key,
            key_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            last_used: None,
            expires_at: None,
            is_default: false,
        }
    }

    /// Expired once `expires_at` passes, or `max_age` after creation when no
    /// explicit expiry is set
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => now - self.created_at >= max_age,
        }
    }
}

impl std::fmt::Debug for EncryptedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedCredential")
            .field("provider", &self.provider)
            .field("key_id", &self.key_id)
            .field("encrypted_key", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("last_used", &self.last_used)
            .field("expires_at", &self.expires_at)
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// A credential decrypted for the current request
///
/// The secret is zeroed when this value is dropped. Callers must not persist
/// or log it.
#[derive(Debug)]
pub struct DecryptedCredential {
    pub key_id: String,
    pub provider: Provider,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_default: bool,
    secret: SecretString,
}

impl DecryptedCredential {
    pub(crate) fn new(record: &EncryptedCredential, secret: SecretString) -> Self {
        Self {
            key_id: record.key_id.clone(),
            provider: record.provider,
            created_at: record.created_at,
            last_used: record.last_used,
            expires_at: record.expires_at,
            is_default: record.is_default,
            secret,
        }
    }

    /// Get the secret value (use carefully)
    pub fn expose(&self) -> &str {
        self.secret.expose()
    }

    /// Display hint: the last four characters and the length
    ///
    /// Leading characters are never shown; for some providers they are
    /// already secret material. Secrets too short to spare four characters
    /// show none.
    pub fn masked(&self) -> String {
        let len = self.secret.len();
        if len < MASK_MIN_LEN {
            return format!("**** ({} chars)", len);
        }
        let value = self.secret.expose();
        let tail: String = value.chars().skip(value.chars().count().saturating_sub(MASK_TAIL)).collect();
        format!("...{} ({} chars)", tail, len)
    }
}

/// Why a stored record could not be opened with the session key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum LockReason {
    /// Wrong passphrase for this record, or the payload is corrupted
    NeedsPassphrase,
    /// Written under a different key derivation version
    NeedsMigration { stored_version: u16 },
}

/// A record that exists but is undecryptable in this session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedCredential {
    pub key_id: String,
    pub provider: Provider,
    pub is_default: bool,
    pub reason: LockReason,
}

/// Result of listing the vault with a session key
#[derive(Debug, Default)]
pub struct CredentialListing {
    /// Records that decrypted cleanly
    pub credentials: Vec<DecryptedCredential>,
    /// Records that exist but could not be opened
    pub locked: Vec<LockedCredential>,
}

impl CredentialListing {
    /// True only when the vault holds no records at all
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty() && self.locked.is_empty()
    }

    /// True when some records exist but none could be opened with this key
    pub fn needs_passphrase(&self) -> bool {
        self.credentials.is_empty() && !self.locked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_created(days_ago: i64) -> EncryptedCredential {
        let mut record = EncryptedCredential::new(Provider::OpenAi, "v2:1:00:00:00".to_string());
        record.created_at = Utc::now() - Duration::days(days_ago);
        record
    }

    #[test]
    fn test_expiry_boundary_from_created_at() {
        let now = Utc::now();
        let max_age = Duration::days(90);

        assert!(record_created(91).is_expired(now, max_age));
        assert!(!record_created(89).is_expired(now, max_age));
    }

    #[test]
    fn test_explicit_expiry_wins() {
        let now = Utc::now();
        let max_age = Duration::days(90);

        let mut old = record_created(200);
        old.expires_at = Some(now + Duration::days(1));
        assert!(!old.is_expired(now, max_age));

        let mut fresh = record_created(1);
        fresh.expires_at = Some(now - Duration::hours(1));
        assert!(fresh.is_expired(now, max_age));
    }

    #[test]
    fn test_persisted_shape() {
        let mut record = record_created(0);
        record.is_default = true;
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["provider"], "openai");
        assert_eq!(json["encryptedKey"], "v2:1:00:00:00");
        assert_eq!(json["isDefault"], true);
        assert!(json.get("keyId").is_some());
        assert!(json.get("lastUsed").is_none());
    }

    #[test]
    fn test_missing_optional_fields_deserialize() {
        let json = r#"{
            "provider": "anthropic",
            "encryptedKey": "abcd",
            "keyId": "k1",
            "createdAt": "2024-01-01T00:00:00Z"
        }"#;
        let record: EncryptedCredential = serde_json::from_str(json).unwrap();
        assert_eq!(record.provider, Provider::Anthropic);
        assert!(!record.is_default);
        assert!(record.last_used.is_none());
    }

    #[test]
    fn test_masked_shows_only_the_tail() {
        let record = record_created(0);

        let mistral = DecryptedCredential::new(
            &record,
            SecretString::new("Ab3dEf6hIj9kLm2nOp5qRs8tUv1wXy4z".to_string()),
        );
        let masked = mistral.masked();
        assert_eq!(masked, "...Xy4z (32 chars)");
        assert!(!masked.contains("Ab3d"));

        let short = DecryptedCredential::new(&record, SecretString::new("abc123".to_string()));
        assert_eq!(short.masked(), "**** (6 chars)");
    }

    #[test]
    fn test_debug_hides_payload() {
        let record = record_created(0);
        let debug = format!("{:?}", record);
        assert!(!debug.contains("v2:1:00"));
        assert!(debug.contains(&record.key_id));
    }

    #[test]
    fn test_listing_states() {
        let mut listing = CredentialListing::default();
        assert!(listing.is_empty());
        assert!(!listing.needs_passphrase());

        listing.locked.push(LockedCredential {
            key_id: "k1".to_string(),
            provider: Provider::OpenAi,
            is_default: true,
            reason: LockReason::NeedsPassphrase,
        });
        assert!(!listing.is_empty());
        assert!(listing.needs_passphrase());
    }
}
