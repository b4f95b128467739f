//! Provider definitions

use serde::{Deserialize, Serialize};

use super::validation::FormatRule;

/// AI service a credential belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Google,
    Mistral,
    Groq,
    Cohere,
}

impl Provider {
    /// Every supported provider, in display order
    pub const ALL: [Provider; 6] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Google,
        Provider::Mistral,
        Provider::Groq,
        Provider::Cohere,
    ];

    /// Stable lowercase tag used in persisted records
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::Mistral => "mistral",
            Provider::Groq => "groq",
            Provider::Cohere => "cohere",
        }
    }

    /// Static configuration for this provider
    pub fn config(&self) -> &'static ProviderConfig {
        match self {
            Provider::OpenAi => &OPENAI,
            Provider::Anthropic => &ANTHROPIC,
            Provider::Google => &GOOGLE,
            Provider::Mistral => &MISTRAL,
            Provider::Groq => &GROQ,
            Provider::Cohere => &COHERE,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = crate::error::VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == tag)
            .ok_or_else(|| crate::error::VaultError::InvalidInput(format!("unknown provider '{}'", s)))
    }
}

/// Compiled-in descriptor for a provider
#[derive(Debug)]
pub struct ProviderConfig {
    /// Human-readable name
    pub display_name: &'static str,
    /// Model identifiers the generation layer may request
    pub models: &'static [&'static str],
    /// Advisory requests-per-minute ceiling
    pub rate_limit_per_minute: u32,
    /// Advisory max output tokens per request
    pub max_tokens: u32,
    /// Syntactic rule a raw credential must satisfy
    pub format: FormatRule,
}

static OPENAI: ProviderConfig = ProviderConfig {
    display_name: "OpenAI",
    models: &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "o1-mini"],
    rate_limit_per_minute: 500,
    max_tokens: 16_384,
    format: FormatRule::Prefixed { prefix: "sk-", min_len: 20 },
};

static ANTHROPIC: ProviderConfig = ProviderConfig {
    display_name: "Anthropic",
    models: &["claude-3-5-sonnet-latest", "claude-3-5-haiku-latest", "claude-3-opus-latest"],
    rate_limit_per_minute: 50,
    max_tokens: 8_192,
    format: FormatRule::Prefixed { prefix: "sk-ant-", min_len: 40 },
};

static GOOGLE: ProviderConfig = ProviderConfig {
    display_name: "Google Gemini",
    models: &["gemini-1.5-pro", "gemini-1.5-flash", "gemini-2.0-flash"],
    rate_limit_per_minute: 60,
    max_tokens: 8_192,
    format: FormatRule::Prefixed { prefix: "AIza", min_len: 39 },
};

static MISTRAL: ProviderConfig = ProviderConfig {
    display_name: "Mistral AI",
    models: &["mistral-large-latest", "mistral-small-latest", "codestral-latest"],
    rate_limit_per_minute: 60,
    max_tokens: 8_192,
    format: FormatRule::Alphanumeric { len: 32 },
};

static GROQ: ProviderConfig = ProviderConfig {
    display_name: "Groq",
    models: &["llama-3.3-70b-versatile", "llama-3.1-8b-instant", "mixtral-8x7b-32768"],
    rate_limit_per_minute: 30,
    max_tokens: 8_192,
    format: FormatRule::Prefixed { prefix: "gsk_", min_len: 40 },
};

static COHERE: ProviderConfig = ProviderConfig {
    display_name: "Cohere",
    models: &["command-r-plus", "command-r", "command-light"],
    rate_limit_per_minute: 20,
    max_tokens: 4_096,
    format: FormatRule::Alphanumeric { len: 40 },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip_through_serde() {
        for provider in Provider::ALL {
            let json = serde_json::to_string(&provider).unwrap();
            assert_eq!(json, format!("\"{}\"", provider.as_str()));
            let back: Provider = serde_json::from_str(&json).unwrap();
            assert_eq!(back, provider);
        }
    }

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!(" google ".parse::<Provider>().unwrap(), Provider::Google);
        assert!("bedrock".parse::<Provider>().is_err());
    }

    #[test]
    fn test_every_provider_has_models() {
        for provider in Provider::ALL {
            assert!(!provider.config().models.is_empty(), "{} has no models", provider);
        }
    }
}
