//! Runtime configuration

use std::time::Duration;

/// Environment variable names honoured by the runtime and providers.
pub mod env_vars {
    pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
    pub const OLLAMA_BASE_URL: &str = "OLLAMA_BASE_URL";
    pub const THINKLANG_MODEL: &str = "THINKLANG_MODEL";
    pub const THINKLANG_CACHE: &str = "THINKLANG_CACHE";
}

/// Tunables for the AI-call runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Model passed to the provider when a call does not name one.
    pub default_model: Option<String>,
    /// TTL for exact-match cache entries.
    pub cache_ttl: Duration,
    /// `THINKLANG_CACHE=false` turns the cache into a no-op.
    pub cache_enabled: bool,
    /// Serialized-context budget in tokens before truncation kicks in.
    pub context_token_budget: usize,
    /// Token estimate: 4 chars per token.
    pub chars_per_token: usize,
    /// Base delay for retry backoff, doubled per attempt.
    pub retry_base_delay: Duration,
    /// Agent loop turn cap when the caller does not set one.
    pub default_max_turns: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            cache_ttl: Duration::from_secs(3600),
            cache_enabled: true,
            context_token_budget: 100_000,
            chars_per_token: 4,
            retry_base_delay: Duration::from_millis(500),
            default_max_turns: 10,
        }
    }
}

impl RuntimeConfig {
    /// Read overrides from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_model: std::env::var(env_vars::THINKLANG_MODEL).ok(),
            cache_enabled: std::env::var(env_vars::THINKLANG_CACHE)
                .map(|v| v != "false")
                .unwrap_or(defaults.cache_enabled),
            ..defaults
        }
    }

    /// The context budget expressed in characters.
    pub fn context_char_budget(&self) -> usize {
        self.context_token_budget * self.chars_per_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = RuntimeConfig::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.context_token_budget, 100_000);
        assert_eq!(config.context_char_budget(), 400_000);
        assert_eq!(config.retry_base_delay, Duration::from_millis(500));
        assert!(config.cache_enabled);
    }
}
