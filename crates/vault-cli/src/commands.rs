//! Subcommands and their execution

use chrono::{Duration, Utc};
use clap::Subcommand;
use std::fmt::Write as _;
use tracing::warn;

use vault_core::{
    CredentialManager, DefaultPromotion, KeyStatus, LockReason, PreferencesUpdate, Provider,
    Result, SecretString, UserPreferences, Vault, VaultError, VaultSession, VaultSettings,
};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store a new API key
    Add {
        provider: Provider,
        /// The key (prompted for when absent)
        #[arg(long, env = "BYOK_VAULT_KEY", hide_env_values = true)]
        key: Option<String>,
    },

    /// List stored keys, masked
    List {
        #[arg(long)]
        json: bool,
    },

    /// Replace the secret of a stored key
    Update {
        key_id: String,
        #[arg(long, env = "BYOK_VAULT_KEY", hide_env_values = true)]
        key: Option<String>,
    },

    /// Delete a stored key
    Remove { key_id: String },

    /// Make a key its provider's default
    #[command(name = "default")]
    SetDefault { key_id: String },

    /// Set or clear an explicit expiry
    Expire {
        key_id: String,
        /// Expire this many days from now
        #[arg(long, conflicts_with = "clear")]
        days: Option<u32>,
        /// Remove the explicit expiry
        #[arg(long)]
        clear: bool,
    },

    /// Show key counts, last use, and expired keys
    Stats,

    /// Check a key's format without storing it
    Check {
        provider: Provider,
        #[arg(long, env = "BYOK_VAULT_KEY", hide_env_values = true)]
        key: Option<String>,
    },

    /// Show supported providers
    Providers,

    /// Show or change preferences
    Prefs {
        #[arg(long)]
        usage_tracking: Option<bool>,
        #[arg(long)]
        gemini_fallback: Option<bool>,
        /// Provider name, or "none" to clear
        #[arg(long)]
        default_provider: Option<String>,
    },

    /// Show or change vault settings
    Settings {
        /// never, most-recently-created, or most-recently-used
        #[arg(long, value_parser = parse_promotion)]
        promotion: Option<DefaultPromotion>,
        #[arg(long)]
        max_age_days: Option<u32>,
    },

    /// Re-encrypt every key under a new passphrase
    Passwd {
        #[arg(long, env = "BYOK_VAULT_NEW_PASSPHRASE", hide_env_values = true)]
        new_passphrase: Option<String>,
    },
}

impl Command {
    /// Whether the command has to unlock the vault
    pub fn needs_passphrase(&self) -> bool {
        matches!(
            self,
            Command::Add { .. } | Command::List { .. } | Command::Update { .. } | Command::Passwd { .. }
        )
    }

    /// Secret argument still missing, with the prompt to ask for it
    pub fn missing_secret(&mut self) -> Option<(&mut Option<String>, &'static str)> {
        match self {
            Command::Add { key, .. } | Command::Update { key, .. } | Command::Check { key, .. }
                if key.is_none() =>
            {
                Some((key, "API key: "))
            }
            Command::Passwd { new_passphrase } if new_passphrase.is_none() => {
                Some((new_passphrase, "New passphrase: "))
            }
            _ => None,
        }
    }
}

fn parse_promotion(s: &str) -> std::result::Result<DefaultPromotion, String> {
    match s.to_ascii_lowercase().replace('_', "-").as_str() {
        "never" => Ok(DefaultPromotion::Never),
        "most-recently-created" | "newest" => Ok(DefaultPromotion::MostRecentlyCreated),
        "most-recently-used" | "recent" => Ok(DefaultPromotion::MostRecentlyUsed),
        other => Err(format!("unknown promotion policy: {}", other)),
    }
}

fn required(value: Option<String>, what: &str) -> Result<SecretString> {
    value
        .map(SecretString::new)
        .ok_or_else(|| VaultError::InvalidInput(format!("no {} given", what)))
}

async fn unlock(vault: &Vault, passphrase: Option<SecretString>) -> Result<VaultSession> {
    let passphrase = passphrase
        .ok_or_else(|| VaultError::InvalidInput("a passphrase is required".to_string()))?;
    let session = vault.unlock(passphrase).await?;

    if session.status() == KeyStatus::Mismatch {
        warn!("This passphrase differs from the one last used; some keys may be locked");
    }
    Ok(session)
}

/// Execute a command and return the text to print
pub async fn run(
    vault: &mut Vault,
    command: Command,
    passphrase: Option<SecretString>,
) -> Result<String> {
    match command {
        Command::Add { provider, key } => {
            let raw = required(key, "API key")?;
            let session = unlock(vault, passphrase).await?;
            let record = vault
                .credentials
                .add_credential(provider, raw.expose(), session.key()?)
                .await?;

            Ok(format!(
                "Added {} key {}{}",
                provider.config().display_name,
                record.key_id,
                if record.is_default { " (default)" } else { "" }
            ))
        }

        Command::List { json } => {
            let session = unlock(vault, passphrase).await?;
            let listing = vault.credentials.get_credentials(session.key()?).await?;

            if json {
                let credentials: Vec<_> = listing
                    .credentials
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "keyId": c.key_id,
                            "provider": c.provider,
                            "masked": c.masked(),
                            "isDefault": c.is_default,
                            "createdAt": c.created_at,
                            "lastUsed": c.last_used,
                            "expiresAt": c.expires_at,
                        })
                    })
                    .collect();
                let value = serde_json::json!({
                    "credentials": credentials,
                    "locked": listing.locked,
                });
                return Ok(serde_json::to_string_pretty(&value)?);
            }

            if listing.is_empty() {
                return Ok("No credentials stored".to_string());
            }

            let mut out = String::new();
            for c in &listing.credentials {
                let _ = write!(
                    out,
                    "{}  {:<9}  {}  created {}",
                    c.key_id,
                    c.provider,
                    c.masked(),
                    c.created_at.format("%Y-%m-%d")
                );
                if let Some(last_used) = c.last_used {
                    let _ = write!(out, "  used {}", last_used.format("%Y-%m-%d"));
                }
                if c.is_default {
                    out.push_str("  [default]");
                }
                out.push('\n');
            }
            for l in &listing.locked {
                let reason = match l.reason {
                    LockReason::NeedsPassphrase => "needs its passphrase".to_string(),
                    LockReason::NeedsMigration { stored_version } => {
                        format!("written with KDF v{}", stored_version)
                    }
                };
                let _ = writeln!(out, "{}  {:<9}  [locked: {}]", l.key_id, l.provider, reason);
            }
            if listing.needs_passphrase() {
                out.push_str("No key could be opened with this passphrase\n");
            }
            Ok(out.trim_end().to_string())
        }

        Command::Update { key_id, key } => {
            let raw = required(key, "API key")?;
            let session = unlock(vault, passphrase).await?;
            vault
                .credentials
                .update_credential(&key_id, raw.expose(), session.key()?)
                .await?;
            Ok(format!("Updated {}", key_id))
        }

        Command::Remove { key_id } => {
            vault.credentials.delete_credential(&key_id).await?;
            Ok(format!("Removed {}", key_id))
        }

        Command::SetDefault { key_id } => {
            vault.credentials.set_default(&key_id).await?;
            Ok(format!("{} is now the default", key_id))
        }

        Command::Expire { key_id, days, clear } => {
            let expires_at = match (days, clear) {
                (Some(days), false) => Some(Utc::now() + Duration::days(i64::from(days))),
                (None, true) => None,
                _ => {
                    return Err(VaultError::InvalidInput(
                        "pass either --days or --clear".to_string(),
                    ))
                }
            };
            vault.credentials.set_expiry(&key_id, expires_at).await?;
            Ok(match expires_at {
                Some(at) => format!("{} expires {}", key_id, at.format("%Y-%m-%d")),
                None => format!("{} no longer has an explicit expiry", key_id),
            })
        }

        Command::Stats => {
            let stats = vault.credentials.get_usage_stats().await?;

            let mut out = format!("{} credentials\n", stats.total);
            for (provider, count) in &stats.by_provider {
                let _ = writeln!(out, "  {:<9} {}", provider, count);
            }
            let _ = writeln!(out, "{} used at least once", stats.last_used.len());
            if !stats.expired.is_empty() {
                let _ = writeln!(out, "Expired:");
                for key_id in &stats.expired {
                    let _ = writeln!(out, "  {}", key_id);
                }
            }
            Ok(out.trim_end().to_string())
        }

        Command::Check { provider, key } => {
            let raw = required(key, "API key")?;
            if CredentialManager::validate_format(provider, raw.expose()) {
                Ok(format!("Valid {} key format", provider.config().display_name))
            } else {
                Err(VaultError::Validation { provider })
            }
        }

        Command::Providers => {
            let mut out = String::new();
            for provider in Provider::ALL {
                let config = provider.config();
                let _ = writeln!(
                    out,
                    "{:<9} {:<18} {} req/min  models: {}",
                    provider,
                    config.display_name,
                    config.rate_limit_per_minute,
                    config.models.join(", ")
                );
            }
            Ok(out.trim_end().to_string())
        }

        Command::Prefs {
            usage_tracking,
            gemini_fallback,
            default_provider,
        } => {
            let mut update = PreferencesUpdate::default();
            if let Some(enabled) = usage_tracking {
                update = update.usage_tracking(enabled);
            }
            if let Some(enabled) = gemini_fallback {
                update = update.gemini_fallback(enabled);
            }
            if let Some(name) = default_provider {
                let provider = match name.as_str() {
                    "none" => None,
                    other => Some(other.parse::<Provider>()?),
                };
                update = update.default_provider(provider);
            }

            let prefs = if update == PreferencesUpdate::default() {
                vault.preferences().await?
            } else {
                vault.update_preferences(update).await?
            };
            Ok(format_preferences(&prefs))
        }

        Command::Settings {
            promotion,
            max_age_days,
        } => {
            if promotion.is_some() || max_age_days.is_some() {
                let current = vault.settings().clone();
                let updated = VaultSettings {
                    default_promotion: promotion.unwrap_or(current.default_promotion),
                    credential_max_age_days: max_age_days
                        .unwrap_or(current.credential_max_age_days),
                    ..current
                };
                vault.update_settings(updated).await?;
            }

            let settings = vault.settings();
            Ok(format!(
                "default promotion: {:?}\nmax credential age: {} days",
                settings.default_promotion, settings.credential_max_age_days
            ))
        }

        Command::Passwd { new_passphrase } => {
            let new_passphrase = required(new_passphrase, "new passphrase")?;
            let mut session = unlock(vault, passphrase).await?;
            let migrated = vault.change_passphrase(&mut session, new_passphrase).await?;
            Ok(format!("Re-encrypted {} credentials", migrated))
        }
    }
}

fn format_preferences(prefs: &UserPreferences) -> String {
    format!(
        "usage tracking: {}\ngemini fallback: {}\ndefault provider: {}\nlast login: {}",
        prefs.usage_tracking_enabled,
        prefs.gemini_fallback_enabled,
        prefs
            .default_provider
            .map(|p| p.to_string())
            .unwrap_or_else(|| "none".to_string()),
        prefs
            .last_login_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vault_core::KdfParams;

    const OPENAI: &str = "sk-aaaaaaaaaaaaaaaaaaaaaaaa";

    fn test_vault() -> (Vault, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let vault = Vault::open_at(temp_dir.path().to_path_buf())
            .unwrap()
            .with_kdf_params(KdfParams::new(1, 1_000));
        (vault, temp_dir)
    }

    fn pass() -> Option<SecretString> {
        Some("passphrase".into())
    }

    async fn add(vault: &mut Vault, key: &str) -> String {
        run(
            vault,
            Command::Add {
                provider: Provider::OpenAi,
                key: Some(key.to_string()),
            },
            pass(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_then_list_masks_secret() {
        let (mut vault, _temp) = test_vault();

        let out = add(&mut vault, OPENAI).await;
        assert!(out.starts_with("Added OpenAI key"));
        assert!(out.ends_with("(default)"));

        let out = run(&mut vault, Command::List { json: false }, pass()).await.unwrap();
        assert!(out.contains("...aaaa (27 chars)"));
        assert!(!out.contains("sk-a"));
        assert!(out.contains("[default]"));
        assert!(!out.contains(OPENAI));

        let out = run(&mut vault, Command::List { json: true }, pass()).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["credentials"][0]["provider"], "openai");
        assert!(!out.contains(OPENAI));
    }

    #[tokio::test]
    async fn test_list_with_other_passphrase_shows_locked() {
        let (mut vault, _temp) = test_vault();
        add(&mut vault, OPENAI).await;

        let out = run(&mut vault, Command::List { json: false }, Some("other".into()))
            .await
            .unwrap();
        assert!(out.contains("[locked: needs its passphrase]"));
        assert!(out.contains("No key could be opened"));
    }

    #[tokio::test]
    async fn test_passphrase_required() {
        let (mut vault, _temp) = test_vault();
        let err = run(&mut vault, Command::List { json: false }, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn test_check_does_not_store() {
        let (mut vault, _temp) = test_vault();

        let out = run(
            &mut vault,
            Command::Check {
                provider: Provider::OpenAi,
                key: Some(OPENAI.to_string()),
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(out, "Valid OpenAI key format");

        let err = run(
            &mut vault,
            Command::Check {
                provider: Provider::Anthropic,
                key: Some(OPENAI.to_string()),
            },
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let stats = run(&mut vault, Command::Stats, None).await.unwrap();
        assert!(stats.starts_with("0 credentials"));
    }

    #[tokio::test]
    async fn test_prefs_update() {
        let (mut vault, _temp) = test_vault();

        let out = run(
            &mut vault,
            Command::Prefs {
                usage_tracking: Some(false),
                gemini_fallback: None,
                default_provider: Some("anthropic".to_string()),
            },
            None,
        )
        .await
        .unwrap();
        assert!(out.contains("usage tracking: false"));
        assert!(out.contains("gemini fallback: true"));
        assert!(out.contains("default provider: anthropic"));

        let err = run(
            &mut vault,
            Command::Prefs {
                usage_tracking: None,
                gemini_fallback: None,
                default_provider: Some("bogus".to_string()),
            },
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn test_settings_update() {
        let (mut vault, _temp) = test_vault();

        let out = run(
            &mut vault,
            Command::Settings {
                promotion: Some(DefaultPromotion::MostRecentlyUsed),
                max_age_days: Some(30),
            },
            None,
        )
        .await
        .unwrap();
        assert!(out.contains("MostRecentlyUsed"));
        assert!(out.contains("30 days"));
        assert_eq!(
            vault.credentials.default_promotion(),
            DefaultPromotion::MostRecentlyUsed
        );
    }

    #[tokio::test]
    async fn test_expire_shows_in_stats() {
        let (mut vault, _temp) = test_vault();
        add(&mut vault, OPENAI).await;
        let key_id = vault.credentials.records().await.unwrap()[0].key_id.clone();

        let err = run(
            &mut vault,
            Command::Expire {
                key_id: key_id.clone(),
                days: None,
                clear: false,
            },
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");

        run(
            &mut vault,
            Command::Expire {
                key_id: key_id.clone(),
                days: Some(0),
                clear: false,
            },
            None,
        )
        .await
        .unwrap();

        let stats = run(&mut vault, Command::Stats, None).await.unwrap();
        assert!(stats.contains("Expired:"));
        assert!(stats.contains(&key_id));
    }

    #[tokio::test]
    async fn test_remove_unknown_is_not_found() {
        let (mut vault, _temp) = test_vault();
        let err = run(
            &mut vault,
            Command::Remove {
                key_id: "missing".to_string(),
            },
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_passwd_reencrypts() {
        let (mut vault, _temp) = test_vault();
        add(&mut vault, OPENAI).await;

        let out = run(
            &mut vault,
            Command::Passwd {
                new_passphrase: Some("fresh".to_string()),
            },
            pass(),
        )
        .await
        .unwrap();
        assert_eq!(out, "Re-encrypted 1 credentials");

        let out = run(&mut vault, Command::List { json: false }, Some("fresh".into()))
            .await
            .unwrap();
        assert!(out.contains("[default]"));
    }

    #[tokio::test]
    async fn test_passwd_with_wrong_passphrase_changes_nothing() {
        let (mut vault, _temp) = test_vault();
        add(&mut vault, OPENAI).await;

        let err = run(
            &mut vault,
            Command::Passwd {
                new_passphrase: Some("fresh".to_string()),
            },
            Some("not the passphrase".into()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");

        let out = run(&mut vault, Command::List { json: false }, pass()).await.unwrap();
        assert!(out.contains("[default]"));
        assert!(!out.contains("locked"));
    }

    #[test]
    fn test_parse_promotion() {
        assert_eq!(parse_promotion("never").unwrap(), DefaultPromotion::Never);
        assert_eq!(
            parse_promotion("most_recently_used").unwrap(),
            DefaultPromotion::MostRecentlyUsed
        );
        assert!(parse_promotion("sometimes").is_err());
    }

    #[test]
    fn test_missing_secret_prompts() {
        let mut command = Command::Add {
            provider: Provider::Groq,
            key: None,
        };
        assert!(command.needs_passphrase());
        let (slot, prompt) = command.missing_secret().unwrap();
        assert_eq!(prompt, "API key: ");
        *slot = Some("gsk_x".to_string());
        assert!(command.missing_secret().is_none());

        assert!(!Command::Stats.needs_passphrase());
    }
}
