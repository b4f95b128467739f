//! Vault settings management
//!
//! Stores non-sensitive configuration in a plain JSON file next to the vault.
//! Settings are readable before any passphrase is entered.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

/// What happens to a provider's default when the default record is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DefaultPromotion {
    /// Leave the provider without a default until the user picks one
    #[default]
    Never,
    /// Promote the newest remaining record
    MostRecentlyCreated,
    /// Promote the remaining record used most recently, falling back to the
    /// newest when none has been used
    MostRecentlyUsed,
}

/// Vault settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultSettings {
    /// Settings file version
    pub version: u32,
    /// Policy applied after deleting a provider's default
    pub default_promotion: DefaultPromotion,
    /// Age after which a record without an explicit expiry counts as expired
    pub credential_max_age_days: u32,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            version: 1,
            default_promotion: DefaultPromotion::Never,
            credential_max_age_days: 90,
        }
    }
}

impl VaultSettings {
    pub fn credential_max_age(&self) -> Duration {
        Duration::days(i64::from(self.credential_max_age_days))
    }
}

/// Settings manager
pub struct SettingsManager {
    settings_file: PathBuf,
    settings: VaultSettings,
}

impl SettingsManager {
    /// Load settings from `storage_dir`
    ///
    /// A missing file yields defaults; an unreadable one is an error rather
    /// than a silent reset.
    pub fn new(storage_dir: &Path) -> Result<Self> {
        let settings_file = storage_dir.join("settings.json");
        let settings = Self::load_from_file(&settings_file)?;

        Ok(Self {
            settings_file,
            settings,
        })
    }

    /// Load settings from file
    fn load_from_file(path: &Path) -> Result<VaultSettings> {
        if !path.exists() {
            debug!("No settings file found, using defaults");
            return Ok(VaultSettings::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: VaultSettings = serde_json::from_str(&contents)?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub async fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.settings)?;

        // Write atomically using temp file
        let temp_path = self.settings_file.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.settings_file).await?;

        debug!("Saved settings to {:?}", self.settings_file);
        Ok(())
    }

    /// Get current settings
    pub fn get(&self) -> &VaultSettings {
        &self.settings
    }

    /// Update settings and save
    pub async fn update(&mut self, settings: VaultSettings) -> Result<()> {
        self.settings = settings;
        self.save().await
    }

    /// Set the default-promotion policy and save
    pub async fn set_default_promotion(&mut self, policy: DefaultPromotion) -> Result<()> {
        self.settings.default_promotion = policy;
        self.save().await
    }

    /// Set the max credential age and save
    pub async fn set_credential_max_age_days(&mut self, days: u32) -> Result<()> {
        self.settings.credential_max_age_days = days;
        self.save().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_settings_default() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path()).unwrap();

        let settings = manager.get();
        assert_eq!(settings.default_promotion, DefaultPromotion::Never);
        assert_eq!(settings.credential_max_age_days, 90);
        assert_eq!(settings.credential_max_age(), Duration::days(90));
    }

    #[tokio::test]
    async fn test_settings_persistence() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut manager = SettingsManager::new(temp_dir.path()).unwrap();
            manager
                .set_default_promotion(DefaultPromotion::MostRecentlyUsed)
                .await
                .unwrap();
            manager.set_credential_max_age_days(30).await.unwrap();
        }

        {
            let manager = SettingsManager::new(temp_dir.path()).unwrap();
            assert_eq!(manager.get().default_promotion, DefaultPromotion::MostRecentlyUsed);
            assert_eq!(manager.get().credential_max_age_days, 30);
        }
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("settings.json"),
            r#"{"defaultPromotion":"mostRecentlyCreated"}"#,
        )
        .unwrap();

        let manager = SettingsManager::new(temp_dir.path()).unwrap();
        assert_eq!(manager.get().default_promotion, DefaultPromotion::MostRecentlyCreated);
        assert_eq!(manager.get().credential_max_age_days, 90);
    }

    #[test]
    fn test_unreadable_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("settings.json"), "nope").unwrap();
        assert!(SettingsManager::new(temp_dir.path()).is_err());
    }
}
