//! User preferences singleton
//!
//! Lives in the credential store next to the records. Partial updates merge
//! into whatever is already stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::Provider;

/// Persisted preferences record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    /// Non-secret check value of the key that last unlocked the vault
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key_ref: Option<String>,

    /// Provider the UI preselects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<Provider>,

    /// Fall back to the platform Gemini credential when no personal key works
    #[serde(default = "enabled")]
    pub gemini_fallback_enabled: bool,

    /// Record `lastUsed` when the generation layer reports a use
    #[serde(default = "enabled")]
    pub usage_tracking_enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

fn enabled() -> bool {
    true
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            encryption_key_ref: None,
            default_provider: None,
            gemini_fallback_enabled: true,
            usage_tracking_enabled: true,
            last_login_at: None,
        }
    }
}

impl UserPreferences {
    /// Merge a partial update, leaving absent fields untouched
    pub fn apply(&mut self, update: PreferencesUpdate) {
        if let Some(key_ref) = update.encryption_key_ref {
            self.encryption_key_ref = key_ref;
        }
        if let Some(provider) = update.default_provider {
            self.default_provider = provider;
        }
        if let Some(enabled) = update.gemini_fallback_enabled {
            self.gemini_fallback_enabled = enabled;
        }
        if let Some(enabled) = update.usage_tracking_enabled {
            self.usage_tracking_enabled = enabled;
        }
        if let Some(at) = update.last_login_at {
            self.last_login_at = at;
        }
    }
}

/// Partial preferences write
///
/// The outer `Option` means "leave unchanged"; for nullable fields the inner
/// `Option` is the new value, so `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferencesUpdate {
    pub encryption_key_ref: Option<Option<String>>,
    pub default_provider: Option<Option<Provider>>,
    pub gemini_fallback_enabled: Option<bool>,
    pub usage_tracking_enabled: Option<bool>,
    pub last_login_at: Option<Option<DateTime<Utc>>>,
}

impl PreferencesUpdate {
    pub fn default_provider(mut self, provider: Option<Provider>) -> Self {
        self.default_provider = Some(provider);
        self
    }

    pub fn gemini_fallback(mut self, enabled: bool) -> Self {
        self.gemini_fallback_enabled = Some(enabled);
        self
    }

    pub fn usage_tracking(mut self, enabled: bool) -> Self {
        self.usage_tracking_enabled = Some(enabled);
        self
    }

    pub fn login(mut self, key_ref: Option<String>, at: DateTime<Utc>) -> Self {
        if key_ref.is_some() {
            self.encryption_key_ref = Some(key_ref);
        }
        self.last_login_at = Some(Some(at));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let prefs = UserPreferences::default();
        assert!(prefs.gemini_fallback_enabled);
        assert!(prefs.usage_tracking_enabled);
        assert!(prefs.default_provider.is_none());
    }

    #[test]
    fn test_partial_update_merges() {
        let mut prefs = UserPreferences::default();
        prefs.apply(PreferencesUpdate::default().default_provider(Some(Provider::Anthropic)));
        prefs.apply(PreferencesUpdate::default().usage_tracking(false));

        assert_eq!(prefs.default_provider, Some(Provider::Anthropic));
        assert!(!prefs.usage_tracking_enabled);
        assert!(prefs.gemini_fallback_enabled);
    }

    #[test]
    fn test_clearing_nullable_field() {
        let mut prefs = UserPreferences::default();
        prefs.apply(PreferencesUpdate::default().default_provider(Some(Provider::Google)));
        prefs.apply(PreferencesUpdate::default().default_provider(None));
        assert!(prefs.default_provider.is_none());
    }

    #[test]
    fn test_sparse_json_fills_defaults() {
        let prefs: UserPreferences = serde_json::from_str(r#"{"defaultProvider":"groq"}"#).unwrap();
        assert_eq!(prefs.default_provider, Some(Provider::Groq));
        assert!(prefs.gemini_fallback_enabled);
        assert!(prefs.usage_tracking_enabled);
    }
}
