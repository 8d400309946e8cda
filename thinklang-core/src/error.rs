//! Error taxonomy for ThinkLang runtime operations

use serde_json::Value;
use thiserror::Error;

/// Provider transport errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("No LLM provider configured")]
    NotConfigured,

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("Invalid API key for {provider}")]
    InvalidApiKey { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing environment variable: {var}")]
    MissingEnv { var: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Provider not supported: {provider}")]
    ProviderNotSupported { provider: String },
}

/// Master error type for the AI-call runtime.
///
/// Every kind the language's `catch` clauses can name lives here; the
/// evaluator dispatches handlers on [`ThinkError::kind`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ThinkError {
    #[error("Schema violation: {reason}")]
    SchemaViolation { reason: String },

    #[error("Confidence {actual} below required threshold {threshold}")]
    ConfidenceTooLow { threshold: f64, actual: f64 },

    #[error("Guard '{guard_name}' failed for value {value}: constraint {constraint}")]
    GuardFailed {
        guard_name: String,
        value: Value,
        constraint: String,
    },

    #[error("Token budget exceeded: {used} tokens against budget {budget}")]
    TokenBudgetExceeded { budget: usize, used: usize },

    #[error("Model '{model}' unavailable on provider {provider}")]
    ModelUnavailable { provider: String, model: String },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Agent exhausted {max_turns} turns ({turns} taken) without a final answer")]
    AgentMaxTurns { max_turns: u32, turns: u32 },

    #[error("Tool '{tool}' execution failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("Batch cost budget ${budget} exceeded (spent ${spent})")]
    BatchCostBudgetExceeded { budget: f64, spent: f64 },

    #[error("Batch aborted")]
    BatchAborted,

    #[error("Assertion failed: {message}")]
    AssertionFailed { message: String },

    #[error("Runtime error: {message}")]
    Runtime { message: String },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ThinkError {
    /// The error-kind name the language's `catch` clauses match against.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaViolation { .. } => "SchemaViolation",
            Self::ConfidenceTooLow { .. } => "ConfidenceTooLow",
            Self::GuardFailed { .. } => "GuardFailed",
            Self::TokenBudgetExceeded { .. } => "TokenBudgetExceeded",
            Self::ModelUnavailable { .. } => "ModelUnavailable",
            Self::Timeout { .. } => "Timeout",
            Self::AgentMaxTurns { .. } => "AgentMaxTurnsError",
            Self::ToolExecution { .. } => "ToolExecutionError",
            Self::BatchCostBudgetExceeded { .. } => "BatchCostBudgetExceeded",
            Self::BatchAborted => "BatchAbortedError",
            Self::AssertionFailed { .. } => "AssertionError",
            Self::Runtime { .. } => "RuntimeError",
            Self::Provider(_) => "ProviderError",
            Self::Config(_) => "ConfigError",
        }
    }

    /// Kinds a `catch` clause is allowed to name.
    pub const CATCHABLE_KINDS: &'static [&'static str] = &[
        "SchemaViolation",
        "ConfidenceTooLow",
        "GuardFailed",
        "TokenBudgetExceeded",
        "ModelUnavailable",
        "Timeout",
        "AgentMaxTurnsError",
        "ToolExecutionError",
        "BatchCostBudgetExceeded",
        "BatchAbortedError",
        "AssertionError",
        "RuntimeError",
        "ProviderError",
        "ConfigError",
    ];
}

/// Result type alias for ThinkLang runtime operations.
pub type ThinkResult<T> = Result<T, ThinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_catchable() {
        let err = ThinkError::Timeout { duration_ms: 500 };
        assert!(ThinkError::CATCHABLE_KINDS.contains(&err.kind()));

        let err = ThinkError::AgentMaxTurns {
            max_turns: 2,
            turns: 2,
        };
        assert_eq!(err.kind(), "AgentMaxTurnsError");
    }

    #[test]
    fn display_carries_detail() {
        let err = ThinkError::ConfidenceTooLow {
            threshold: 0.9,
            actual: 0.4,
        };
        let msg = err.to_string();
        assert!(msg.contains("0.9"));
        assert!(msg.contains("0.4"));
    }
}
