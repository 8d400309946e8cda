//! Concrete provider clients

mod anthropic;
mod gemini;
mod ollama;
mod openai;
mod pacing;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub(crate) use pacing::RequestPacer;

use crate::Provider;
use std::sync::Arc;
use thinklang_core::{env_vars, ConfigError, ThinkError, ThinkResult};

fn required_env(var: &str) -> ThinkResult<String> {
    std::env::var(var).map_err(|_| {
        ConfigError::MissingEnv {
            var: var.to_string(),
        }
        .into()
    })
}

pub fn anthropic_from_env(model: Option<String>) -> ThinkResult<Arc<dyn Provider>> {
    let key = required_env(env_vars::ANTHROPIC_API_KEY)?;
    Ok(Arc::new(AnthropicProvider::new(key, model)))
}

pub fn openai_from_env(model: Option<String>) -> ThinkResult<Arc<dyn Provider>> {
    let key = required_env(env_vars::OPENAI_API_KEY)?;
    Ok(Arc::new(OpenAiProvider::new(key, model)))
}

pub fn gemini_from_env(model: Option<String>) -> ThinkResult<Arc<dyn Provider>> {
    let key = required_env(env_vars::GEMINI_API_KEY)?;
    Ok(Arc::new(GeminiProvider::new(key, model)))
}

pub fn ollama_from_env(model: Option<String>) -> ThinkResult<Arc<dyn Provider>> {
    let base_url = std::env::var(env_vars::OLLAMA_BASE_URL)
        .unwrap_or_else(|_| "http://localhost:11434".to_string());
    Ok(Arc::new(OllamaProvider::new(base_url, model)))
}

/// Map an HTTP error status onto the runtime taxonomy.
pub(crate) fn map_error_status(
    provider: &str,
    status: u16,
    message: String,
    model: &str,
) -> ThinkError {
    match status {
        429 => thinklang_core::ProviderError::RateLimited {
            provider: provider.to_string(),
        }
        .into(),
        401 | 403 => thinklang_core::ProviderError::InvalidApiKey {
            provider: provider.to_string(),
        }
        .into(),
        404 => ThinkError::ModelUnavailable {
            provider: provider.to_string(),
            model: model.to_string(),
        },
        400 if message.to_lowercase().contains("model") => ThinkError::ModelUnavailable {
            provider: provider.to_string(),
            model: model.to_string(),
        },
        _ => thinklang_core::ProviderError::RequestFailed {
            provider: provider.to_string(),
            status,
            message,
        }
        .into(),
    }
}

pub(crate) fn transport_error(provider: &str, error: reqwest::Error) -> ThinkError {
    if error.is_timeout() {
        return ThinkError::Timeout { duration_ms: 0 };
    }
    thinklang_core::ProviderError::RequestFailed {
        provider: provider.to_string(),
        status: error.status().map(|s| s.as_u16()).unwrap_or(0),
        message: error.to_string(),
    }
    .into()
}
