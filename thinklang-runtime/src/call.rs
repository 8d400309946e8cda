//! The `think` / `infer` / `reason` call pipeline
//!
//! Each call runs the same spine: Confident schema transform, context
//! shaping, cache probe, prompt composition, provider call, usage record,
//! guard evaluation, cache fill, Confident wrapping. Retries wrap the
//! whole execute with exponential backoff and an optional fallback.

use crate::Runtime;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thinklang_core::{
    check_guards, Confident, ExactMatchCache, GuardRule, JsonSchema, Operation, ThinkError,
    ThinkResult,
};
use thinklang_llm::CompletionRequest;

const SYSTEM_PROMPT: &str = "You are a precise structured-output engine. \
Produce only data conforming to the requested schema, with no commentary.";

/// Marker appended to strings cut by context truncation.
const TRUNCATION_SUFFIX: &str = "...[truncated]";

pub type FallbackFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ThinkResult<Value>> + Send>> + Send + Sync>;

/// Options shared by every AI call.
#[derive(Clone, Default)]
pub struct CallOptions {
    pub json_schema: Option<JsonSchema>,
    pub schema_name: Option<String>,
    /// Wrap the schema in the Confident projection and the result in a
    /// `Confident` value.
    pub uncertain: bool,
    pub context: Map<String, Value>,
    pub without_keys: Vec<String>,
    pub guards: Vec<GuardRule>,
    pub retry_count: u32,
    pub fallback: Option<FallbackFn>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
}

impl std::fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("schema_name", &self.schema_name)
            .field("uncertain", &self.uncertain)
            .field("retry_count", &self.retry_count)
            .field("guards", &self.guards.len())
            .finish()
    }
}

/// What an AI call evaluates to.
#[derive(Debug, Clone, PartialEq)]
pub enum AiValue {
    Plain(Value),
    Confident(Confident<Value>),
}

impl AiValue {
    /// The payload regardless of wrapping.
    pub fn into_plain(self) -> Value {
        match self {
            Self::Plain(value) => value,
            Self::Confident(confident) => confident.value,
        }
    }
}

/// `think<T>("prompt")`.
pub async fn think(runtime: &Runtime, prompt: &str, options: CallOptions) -> ThinkResult<AiValue> {
    run_call(runtime, Operation::Think, prompt.to_string(), options).await
}

/// `infer<T>(value, hint: "...")`.
pub async fn infer(
    runtime: &Runtime,
    value: &Value,
    hint: Option<&str>,
    options: CallOptions,
) -> ThinkResult<AiValue> {
    let mut message = format!(
        "Analyze this value: {}",
        serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
    );
    if let Some(hint) = hint {
        message.push_str(&format!("\n\nHint: {}", hint));
    }
    run_call(runtime, Operation::Infer, message, options).await
}

/// `reason<T> { goal: ..., steps: ... }`.
pub async fn reason(
    runtime: &Runtime,
    goal: &str,
    steps: &[String],
    options: CallOptions,
) -> ThinkResult<AiValue> {
    let mut message = format!("Goal: {}\n\nReasoning steps:\n", goal);
    for (index, step) in steps.iter().enumerate() {
        message.push_str(&format!("{}. {}\n", index + 1, step));
    }
    message.push_str("\nWork through each step carefully, then produce your final structured answer.");
    run_call(runtime, Operation::Reason, message, options).await
}

/// The semantic assertion used by the test framework: a boolean verdict
/// with an explanation.
pub async fn semantic_assert(
    runtime: &Runtime,
    subject: &Value,
    criteria: &str,
) -> ThinkResult<(bool, String)> {
    let schema = JsonSchema::Object {
        properties: vec![
            ("passes".to_string(), JsonSchema::Boolean),
            ("explanation".to_string(), JsonSchema::string()),
        ],
        required: vec!["passes".to_string(), "explanation".to_string()],
        description: None,
    };

    let prompt = format!(
        "Evaluate whether this value satisfies the criteria.\n\nValue: {}\n\nCriteria: {}",
        serde_json::to_string(subject).unwrap_or_else(|_| subject.to_string()),
        criteria
    );

    let options = CallOptions {
        json_schema: Some(schema),
        schema_name: Some("SemanticAssertion".to_string()),
        ..Default::default()
    };

    let verdict = run_call(runtime, Operation::SemanticAssert, prompt, options)
        .await?
        .into_plain();

    let passes = verdict
        .get("passes")
        .and_then(|p| p.as_bool())
        .unwrap_or(false);
    let explanation = verdict
        .get("explanation")
        .and_then(|e| e.as_str())
        .unwrap_or_default()
        .to_string();

    Ok((passes, explanation))
}

async fn run_call(
    runtime: &Runtime,
    operation: Operation,
    user_message: String,
    options: CallOptions,
) -> ThinkResult<AiValue> {
    let retry_count = options.retry_count;
    let fallback = options.fallback.clone();

    let attempt_result = with_retry(retry_count, runtime.config.retry_base_delay, || {
        execute_call(runtime, operation, &user_message, &options)
    })
    .await;

    match attempt_result {
        Ok(value) => Ok(value),
        Err(error) => match fallback {
            Some(fallback) => {
                tracing::debug!(error = %error, "AI call exhausted retries, using fallback");
                Ok(AiValue::Plain(fallback().await?))
            }
            None => Err(error),
        },
    }
}

/// One attempt of the full call spine.
async fn execute_call(
    runtime: &Runtime,
    operation: Operation,
    user_message: &str,
    options: &CallOptions,
) -> ThinkResult<AiValue> {
    // 1. Schema transform.
    let schema = match (&options.json_schema, options.uncertain) {
        (Some(schema), true) if !schema.is_confident_shape() => {
            Some(JsonSchema::confident(schema.clone()))
        }
        (Some(schema), _) => Some(schema.clone()),
        (None, _) => None,
    };
    let schema_value = schema.as_ref().map(|s| s.to_value());

    // 2. Context shaping.
    let context = shape_context(
        options.context.clone(),
        &options.without_keys,
        runtime.config.context_char_budget(),
    );

    // 3. Cache probe.
    let cache_key = ExactMatchCache::key(
        user_message,
        &Value::Object(context.clone()),
        schema_value.as_ref().unwrap_or(&Value::Null),
    );
    if let Some(hit) = runtime.cache.get(&cache_key) {
        tracing::debug!(operation = operation.as_str(), "cache hit");
        return Ok(wrap_result(schema.as_ref(), hit));
    }

    // 4. Prompt compose.
    let mut full_message = user_message.to_string();
    if !context.is_empty() {
        let rendered = serde_json::to_string_pretty(&Value::Object(context.clone()))
            .unwrap_or_else(|_| "{}".to_string());
        full_message.push_str(&format!("\n\nContext: {}", rendered));
    }

    // 5. Call provider.
    let provider = runtime.provider()?;
    let started = Instant::now();
    let completion = provider
        .complete(CompletionRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_message: full_message,
            json_schema: schema_value.clone(),
            schema_name: options.schema_name.clone(),
            model: options.model.clone().or(runtime.config.default_model.clone()),
            max_tokens: options.max_tokens,
            ..Default::default()
        })
        .await?;
    let duration_ms = started.elapsed().as_millis() as u64;

    // 6. Post-process: usage record, schema validation, guards, cache,
    //    Confident wrapping.
    runtime.tracker.record(
        operation,
        &completion.model,
        completion.usage.input_tokens,
        completion.usage.output_tokens,
        user_message,
        duration_ms,
    );

    if let Some(schema) = &schema {
        if let Err(reason) = schema.validate(&completion.data) {
            return Err(ThinkError::SchemaViolation { reason });
        }
    }

    // Guards constrain the value the program sees: inside a Confident
    // envelope that is the `value` field.
    let guard_target = match &schema {
        Some(schema) if schema.is_confident_shape() => {
            completion.data.get("value").unwrap_or(&completion.data)
        }
        _ => &completion.data,
    };
    check_guards(&options.guards, guard_target)?;

    runtime.cache.put(cache_key, completion.data.clone());

    Ok(wrap_result(schema.as_ref(), completion.data))
}

/// Confident wrapping is purely structural on the schema used for the call.
fn wrap_result(schema: Option<&JsonSchema>, payload: Value) -> AiValue {
    match schema {
        Some(schema) if schema.is_confident_shape() => match Confident::from_payload(payload) {
            Ok(confident) => AiValue::Confident(confident),
            Err(_) => AiValue::Plain(Value::Null),
        },
        _ => AiValue::Plain(payload),
    }
}

/// Drop excluded keys, then shed the largest entries until the serialized
/// context fits the budget, truncating oversized strings.
pub fn shape_context(
    mut context: Map<String, Value>,
    without_keys: &[String],
    char_budget: usize,
) -> Map<String, Value> {
    for key in without_keys {
        context.remove(key);
    }

    let size = |map: &Map<String, Value>| Value::Object(map.clone()).to_string().len();

    if size(&context) <= char_budget {
        return context;
    }

    tracing::warn!(
        budget_chars = char_budget,
        "context exceeds token budget, dropping largest entries"
    );

    // Truncate oversized strings first, then drop whole entries largest
    // first until the rendering fits.
    let per_entry_cap = (char_budget / 4).max(256);
    for value in context.values_mut() {
        if let Value::String(s) = value {
            if s.len() > per_entry_cap {
                let mut cut = s.chars().take(per_entry_cap).collect::<String>();
                cut.push_str(TRUNCATION_SUFFIX);
                *value = Value::String(cut);
            }
        }
    }

    while size(&context) > char_budget && !context.is_empty() {
        let largest = context
            .iter()
            .max_by_key(|(_, v)| v.to_string().len())
            .map(|(k, _)| k.clone());
        match largest {
            Some(key) => {
                context.remove(&key);
            }
            None => break,
        }
    }

    context
}

/// Retry driver: up to `retry_count` additional attempts after the first,
/// with exponential backoff starting at `base_delay`.
pub async fn with_retry<T, F, Fut>(retry_count: u32, base_delay: Duration, f: F) -> ThinkResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ThinkResult<T>>,
{
    let attempts = retry_count.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = base_delay * 2u32.saturating_pow(attempt - 1);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
            tokio::time::sleep(delay).await;
        }
        match f().await {
            Ok(value) => return Ok(value),
            Err(error) => last_error = Some(error),
        }
    }

    Err(last_error.unwrap_or(ThinkError::Runtime {
        message: "retry driver ran zero attempts".to_string(),
    }))
}
