//! Syntactic credential checks, applied before anything is encrypted

use super::Provider;

/// Format rule for a provider's credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatRule {
    /// Fixed literal prefix plus a minimum total length
    Prefixed { prefix: &'static str, min_len: usize },
    /// Exact length of ASCII letters and digits, for providers without a prefix
    Alphanumeric { len: usize },
}

impl FormatRule {
    /// Check a raw secret against this rule
    pub fn matches(&self, raw: &str) -> bool {
        if raw.is_empty() || raw.chars().any(char::is_whitespace) {
            return false;
        }

        match *self {
            FormatRule::Prefixed { prefix, min_len } => {
                raw.starts_with(prefix) && raw.len() >= min_len
            }
            FormatRule::Alphanumeric { len } => {
                raw.len() == len && raw.bytes().all(|b| b.is_ascii_alphanumeric())
            }
        }
    }
}

/// Validate a raw credential against its provider's rule
///
/// Pure and cheap; safe to call on every keystroke.
pub fn validate_format(provider: Provider, raw: &str) -> bool {
    provider.config().format.matches(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_prefix_and_length() {
        assert!(validate_format(Provider::OpenAi, "sk-aaaaaaaaaaaaaaaaaaaaaaaa"));
        assert!(validate_format(Provider::OpenAi, "sk-proj-abcdefghijklmnop"));
        assert!(!validate_format(Provider::OpenAi, "sk-short"));
        assert!(!validate_format(Provider::OpenAi, "bad-format"));
        assert!(!validate_format(Provider::OpenAi, ""));
    }

    #[test]
    fn test_anthropic_needs_its_own_prefix() {
        let key = format!("sk-ant-{}", "a".repeat(40));
        assert!(validate_format(Provider::Anthropic, &key));
        // An OpenAI-shaped key is not an Anthropic key
        assert!(!validate_format(Provider::Anthropic, &format!("sk-{}", "a".repeat(40))));
    }

    #[test]
    fn test_google_key() {
        let key = format!("AIza{}", "B".repeat(35));
        assert!(validate_format(Provider::Google, &key));
        assert!(!validate_format(Provider::Google, "AIzaTooShort"));
    }

    #[test]
    fn test_alphanumeric_rule() {
        assert!(validate_format(Provider::Mistral, &"a1".repeat(16)));
        assert!(!validate_format(Provider::Mistral, &"a1".repeat(17)));
        assert!(!validate_format(Provider::Mistral, &format!("{}-", "a".repeat(31))));
        assert!(validate_format(Provider::Cohere, &"Z9".repeat(20)));
    }

    #[test]
    fn test_whitespace_rejected() {
        assert!(!validate_format(Provider::OpenAi, "sk-aaaaaaaaaa aaaaaaaaaaaaa"));
        assert!(!validate_format(Provider::OpenAi, "sk-aaaaaaaaaaaaaaaaaaaaaaaa\n"));
    }
}
