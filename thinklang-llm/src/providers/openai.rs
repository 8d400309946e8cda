//! OpenAI Chat Completions provider

use super::{map_error_status, transport_error, RequestPacer};
use crate::{Completion, CompletionRequest, Provider, StopReason, TokenUsage};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thinklang_core::{Message, ProviderError, Role, ThinkResult, ToolCall};

const PROVIDER: &str = "openai";
const DEFAULT_MODEL: &str = "gpt-4o";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    pacer: RequestPacer,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            pacer: RequestPacer::new(60),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, request: &CompletionRequest, model: &str) -> Value {
        let mut messages = Vec::new();
        if !request.system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": request.system_prompt}));
        }
        match &request.messages {
            Some(transcript) => {
                for message in transcript {
                    to_wire_messages(message, &mut messages);
                }
            }
            None => messages.push(json!({"role": "user", "content": request.user_message})),
        }

        let mut body = json!({
            "model": model,
            "messages": messages,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_completion_tokens"] = json!(max_tokens);
        }
        if let Some(stops) = &request.stop_sequences {
            body["stop"] = json!(stops);
        }
        if let Some(schema) = &request.json_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name.clone().unwrap_or_else(|| "structured_output".to_string()),
                    "schema": schema,
                    "strict": true,
                },
            });
        }
        if let Some(tools) = &request.tools {
            let wire_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        },
                    })
                })
                .collect();
            body["tools"] = json!(wire_tools);
        }

        body
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> ThinkResult<Completion> {
        let _permit = self.pacer.acquire().await;

        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = self.build_body(&request, &model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<WireError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(map_error_status(PROVIDER, status.as_u16(), message, &model));
        }

        let wire: WireResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            }
        })?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "no choices in response".to_string(),
            })?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                input: serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments)),
            })
            .collect();

        let content = choice.message.content.unwrap_or_default();
        let data = if request.json_schema.is_some() {
            serde_json::from_str(&content).unwrap_or(Value::String(content))
        } else {
            Value::String(content)
        };

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("tool_calls") if !tool_calls.is_empty() => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            Some("stop") if request.stop_sequences.is_some() => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        };

        Ok(Completion {
            data,
            usage: TokenUsage {
                input_tokens: wire.usage.prompt_tokens,
                output_tokens: wire.usage.completion_tokens,
            },
            model: wire.model.unwrap_or(model),
            tool_calls,
            stop_reason,
        })
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// One transcript message can expand to several wire messages (one per
/// tool result).
fn to_wire_messages(message: &Message, out: &mut Vec<Value>) {
    match message.role {
        Role::User => out.push(json!({"role": "user", "content": message.content})),
        Role::Assistant => {
            let mut wire = json!({"role": "assistant", "content": message.content});
            if let Some(calls) = &message.tool_calls {
                let wire_calls: Vec<Value> = calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.input.to_string(),
                            },
                        })
                    })
                    .collect();
                wire["tool_calls"] = json!(wire_calls);
            }
            out.push(wire);
        }
        Role::ToolResult => {
            for result in message.tool_results.iter().flatten() {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": result.tool_call_id,
                    "content": match &result.output {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    },
                }));
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: WireUsage,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_maps_to_response_format() {
        let provider = OpenAiProvider::new("key", None);
        let request = CompletionRequest {
            user_message: "go".to_string(),
            json_schema: Some(json!({"type": "object"})),
            schema_name: Some("Out".to_string()),
            ..Default::default()
        };
        let body = provider.build_body(&request, DEFAULT_MODEL);
        assert_eq!(body["response_format"]["type"], json!("json_schema"));
        assert_eq!(body["response_format"]["json_schema"]["name"], json!("Out"));
    }

    #[test]
    fn tool_results_expand_per_call() {
        let message = Message::tool_results(vec![
            thinklang_core::ToolOutcome {
                tool_call_id: "a".to_string(),
                output: json!("one"),
                is_error: false,
            },
            thinklang_core::ToolOutcome {
                tool_call_id: "b".to_string(),
                output: json!({"n": 2}),
                is_error: false,
            },
        ]);
        let mut out = Vec::new();
        to_wire_messages(&message, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["tool_call_id"], json!("a"));
        assert_eq!(out[1]["tool_call_id"], json!("b"));
    }
}
