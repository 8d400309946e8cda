//! Ollama local provider
//!
//! Uses the `/api/chat` endpoint with `format` set to the requested JSON
//! schema. Ollama does not issue tool-call ids either; `call_<n>` ids are
//! synthesised the same way as the Gemini client.

use super::{map_error_status, transport_error, RequestPacer};
use crate::{Completion, CompletionRequest, Provider, StopReason, TokenUsage};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thinklang_core::{Message, ProviderError, Role, ThinkResult, ToolCall};

const PROVIDER: &str = "ollama";
const DEFAULT_MODEL: &str = "llama3.2";

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    pacer: RequestPacer,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            pacer: RequestPacer::new(120),
        }
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
            "stream": false,
        });

        if let Some(schema) = &request.json_schema {
            body["format"] = schema.clone();
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
impl Provider for OllamaProvider {
    async fn complete(&self, request: CompletionRequest) -> ThinkResult<Completion> {
        let _permit = self.pacer.acquire().await;

        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = self.build_body(&request, &model);

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_error_status(PROVIDER, status.as_u16(), text, &model));
        }

        let wire: WireResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            }
        })?;

        let tool_calls: Vec<ToolCall> = wire
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, call)| ToolCall {
                id: format!("call_{}", index),
                name: call.function.name,
                input: call.function.arguments,
            })
            .collect();

        let content = wire.message.content;
        let data = if request.json_schema.is_some() {
            serde_json::from_str(&content).unwrap_or(Value::String(content))
        } else {
            Value::String(content)
        };

        let stop_reason = if !tool_calls.is_empty() {
            StopReason::ToolUse
        } else if wire.done_reason.as_deref() == Some("length") {
            StopReason::MaxTokens
        } else {
            StopReason::EndTurn
        };

        Ok(Completion {
            data,
            usage: TokenUsage {
                input_tokens: wire.prompt_eval_count.unwrap_or(0),
                output_tokens: wire.eval_count.unwrap_or(0),
            },
            model,
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

impl std::fmt::Debug for OllamaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

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
                            "function": {"name": call.name, "arguments": call.input},
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
    message: WireMessage,
    #[serde(default)]
    done_reason: Option<String>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_rides_in_format_field() {
        let provider = OllamaProvider::new("http://localhost:11434", None);
        let request = CompletionRequest {
            user_message: "go".to_string(),
            json_schema: Some(json!({"type": "object"})),
            ..Default::default()
        };
        let body = provider.build_body(&request, DEFAULT_MODEL);
        assert_eq!(body["format"], json!({"type": "object"}));
        assert_eq!(body["stream"], json!(false));
    }
}
