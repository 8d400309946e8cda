//! ThinkLang LLM - Provider Abstraction
//!
//! One operation: `complete`. The runtime depends only on the [`Provider`]
//! trait; the concrete Anthropic / OpenAI / Gemini / Ollama clients live in
//! [`providers`] and are constructed from environment credentials, a
//! registry factory, or directly by the application.

pub mod providers;
mod replay;
mod scripted;

pub use replay::*;
pub use scripted::*;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thinklang_core::{env_vars, Message, ProviderError, ThinkResult, ToolCall};

/// A tool exposed to a provider, already projected to raw JSON Schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    /// Terminal reasons end the agent loop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ToolUse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// The single request shape every provider accepts.
///
/// When `messages` is absent the provider synthesises a single user turn
/// from `user_message`; when present the transcript is used verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub json_schema: Option<Value>,
    pub schema_name: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub messages: Option<Vec<Message>>,
    pub tools: Option<Vec<ToolSpec>>,
    pub tool_choice: Option<String>,
    pub stop_sequences: Option<Vec<String>>,
}

/// The single response shape every provider returns. Tool-call ids must
/// survive verbatim into the next turn's tool results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub data: Value,
    pub usage: TokenUsage,
    pub model: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
}

/// The one operation the core depends on.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> ThinkResult<Completion>;

    /// Short provider name for diagnostics and cost records.
    fn name(&self) -> &str;

    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;
}

// ============================================================================
// CURRENT PROVIDER
// ============================================================================

static CURRENT_PROVIDER: Lazy<RwLock<Option<Arc<dyn Provider>>>> =
    Lazy::new(|| RwLock::new(None));

/// Swap the process-wide current provider.
pub fn set_provider(provider: Arc<dyn Provider>) {
    if let Ok(mut current) = CURRENT_PROVIDER.write() {
        *current = Some(provider);
    }
}

/// Drop the current provider (the next lookup re-runs auto-init).
pub fn clear_provider() {
    if let Ok(mut current) = CURRENT_PROVIDER.write() {
        *current = None;
    }
}

/// The current provider, auto-initialised from environment credentials on
/// first use.
pub fn current_provider() -> ThinkResult<Arc<dyn Provider>> {
    if let Ok(current) = CURRENT_PROVIDER.read() {
        if let Some(provider) = current.as_ref() {
            return Ok(Arc::clone(provider));
        }
    }

    match auto_init_from_env() {
        Some(provider) => {
            set_provider(Arc::clone(&provider));
            Ok(provider)
        }
        None => Err(ProviderError::NotConfigured.into()),
    }
}

/// Build a provider from environment credentials, in priority order
/// Anthropic → OpenAI → Gemini → Ollama.
pub fn auto_init_from_env() -> Option<Arc<dyn Provider>> {
    let model = std::env::var(env_vars::THINKLANG_MODEL).ok();

    if let Ok(key) = std::env::var(env_vars::ANTHROPIC_API_KEY) {
        return Some(Arc::new(providers::AnthropicProvider::new(key, model.clone())));
    }
    if let Ok(key) = std::env::var(env_vars::OPENAI_API_KEY) {
        return Some(Arc::new(providers::OpenAiProvider::new(key, model.clone())));
    }
    if let Ok(key) = std::env::var(env_vars::GEMINI_API_KEY) {
        return Some(Arc::new(providers::GeminiProvider::new(key, model.clone())));
    }
    if let Ok(base_url) = std::env::var(env_vars::OLLAMA_BASE_URL) {
        return Some(Arc::new(providers::OllamaProvider::new(base_url, model)));
    }
    None
}

// ============================================================================
// PROVIDER REGISTRY
// ============================================================================

/// Factory used for indirect construction by name.
pub type ProviderFactory = fn(Option<String>) -> ThinkResult<Arc<dyn Provider>>;

/// Name → factory registry. `new()` seeds the built-in providers.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("anthropic", providers::anthropic_from_env);
        registry.register("openai", providers::openai_from_env);
        registry.register("gemini", providers::gemini_from_env);
        registry.register("ollama", providers::ollama_from_env);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn create(&self, name: &str, model: Option<String>) -> ThinkResult<Arc<dyn Provider>> {
        match self.factories.get(name) {
            Some(factory) => factory(model),
            None => Err(thinklang_core::ConfigError::ProviderNotSupported {
                provider: name.to_string(),
            }
            .into()),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_builtin_names() {
        let registry = ProviderRegistry::new();
        assert_eq!(
            registry.names(),
            vec!["anthropic", "gemini", "ollama", "openai"]
        );
    }

    #[test]
    fn registry_rejects_unknown_provider() {
        let registry = ProviderRegistry::new();
        match registry.create("mystery", None) {
            Err(err) => assert_eq!(err.kind(), "ConfigError"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn token_usage_accumulates() {
        let mut total = TokenUsage::default();
        total.accumulate(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        total.accumulate(TokenUsage {
            input_tokens: 3,
            output_tokens: 2,
        });
        assert_eq!(total.input_tokens, 13);
        assert_eq!(total.output_tokens, 7);
    }

    #[test]
    fn stop_reason_terminality() {
        assert!(StopReason::EndTurn.is_terminal());
        assert!(StopReason::MaxTokens.is_terminal());
        assert!(StopReason::StopSequence.is_terminal());
        assert!(!StopReason::ToolUse.is_terminal());
    }
}
