//! Anthropic Messages API provider

use super::{map_error_status, transport_error, RequestPacer};
use crate::{Completion, CompletionRequest, Provider, StopReason, TokenUsage, ToolSpec};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thinklang_core::{Message, ProviderError, Role, ThinkResult, ToolCall};

const PROVIDER: &str = "anthropic";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// The synthetic tool used to force schema-conformant output.
const STRUCTURED_TOOL: &str = "structured_output";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    pacer: RequestPacer,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            pacer: RequestPacer::new(50),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, request: &CompletionRequest, model: &str) -> Value {
        let messages = match &request.messages {
            Some(transcript) => transcript.iter().map(to_wire_message).collect::<Vec<_>>(),
            None => vec![json!({
                "role": "user",
                "content": [{"type": "text", "text": request.user_message}],
            })],
        };

        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });

        if !request.system_prompt.is_empty() {
            body["system"] = json!(request.system_prompt);
        }
        if let Some(stops) = &request.stop_sequences {
            body["stop_sequences"] = json!(stops);
        }

        let mut tools: Vec<Value> = request
            .tools
            .iter()
            .flatten()
            .map(|t: &ToolSpec| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();

        // Structured output rides on a forced tool call whose input schema
        // is the requested schema.
        if let Some(schema) = &request.json_schema {
            let name = request
                .schema_name
                .clone()
                .unwrap_or_else(|| STRUCTURED_TOOL.to_string());
            tools.push(json!({
                "name": name,
                "description": "Produce the final structured answer.",
                "input_schema": schema,
            }));
            body["tool_choice"] = json!({"type": "tool", "name": name});
        } else if let Some(choice) = &request.tool_choice {
            body["tool_choice"] = json!({"type": "tool", "name": choice});
        }

        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest) -> ThinkResult<Completion> {
        let _permit = self.pacer.acquire().await;

        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = self.build_body(&request, &model);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
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

        let structured_name = request
            .schema_name
            .clone()
            .unwrap_or_else(|| STRUCTURED_TOOL.to_string());

        let mut text = String::new();
        let mut structured: Option<Value> = None;
        let mut tool_calls = Vec::new();

        for block in &wire.content {
            match block.kind.as_str() {
                "text" => {
                    if let Some(t) = &block.text {
                        text.push_str(t);
                    }
                }
                "tool_use" => {
                    let name = block.name.clone().unwrap_or_default();
                    let input = block.input.clone().unwrap_or(Value::Null);
                    if request.json_schema.is_some() && name == structured_name {
                        structured = Some(input);
                    } else {
                        tool_calls.push(ToolCall {
                            id: block.id.clone().unwrap_or_default(),
                            name,
                            input,
                        });
                    }
                }
                _ => {}
            }
        }

        let usage = TokenUsage {
            input_tokens: wire.usage.input_tokens,
            output_tokens: wire.usage.output_tokens,
        };

        // A forced structured answer is a terminal turn even though the
        // wire reports tool_use.
        let (data, stop_reason) = if let Some(value) = structured {
            (value, StopReason::EndTurn)
        } else {
            let stop = match wire.stop_reason.as_deref() {
                Some("tool_use") if !tool_calls.is_empty() => StopReason::ToolUse,
                Some("max_tokens") => StopReason::MaxTokens,
                Some("stop_sequence") => StopReason::StopSequence,
                _ => StopReason::EndTurn,
            };
            (Value::String(text), stop)
        };

        Ok(Completion {
            data,
            usage,
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

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Transcript conversion: assistant tool calls become `tool_use` blocks,
/// tool results become `tool_result` blocks on a user turn.
fn to_wire_message(message: &Message) -> Value {
    match message.role {
        Role::User => json!({
            "role": "user",
            "content": [{"type": "text", "text": message.content}],
        }),
        Role::Assistant => {
            let mut content = Vec::new();
            if !message.content.is_empty() {
                content.push(json!({"type": "text", "text": message.content}));
            }
            for call in message.tool_calls.iter().flatten() {
                content.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.input,
                }));
            }
            json!({"role": "assistant", "content": content})
        }
        Role::ToolResult => {
            let content: Vec<Value> = message
                .tool_results
                .iter()
                .flatten()
                .map(|result| {
                    json!({
                        "type": "tool_result",
                        "tool_use_id": result.tool_call_id,
                        "content": stringify(&result.output),
                        "is_error": result.is_error,
                    })
                })
                .collect();
            json!({"role": "user", "content": content})
        }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
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
    fn schema_becomes_forced_tool() {
        let provider = AnthropicProvider::new("key", None);
        let request = CompletionRequest {
            user_message: "classify".to_string(),
            json_schema: Some(json!({"type": "string"})),
            schema_name: Some("Sentiment".to_string()),
            ..Default::default()
        };
        let body = provider.build_body(&request, DEFAULT_MODEL);

        assert_eq!(body["tool_choice"]["name"], json!("Sentiment"));
        assert_eq!(body["tools"][0]["name"], json!("Sentiment"));
        assert_eq!(body["tools"][0]["input_schema"], json!({"type": "string"}));
    }

    #[test]
    fn transcript_round_trips_tool_call_ids() {
        let assistant = Message::assistant_tool_calls(
            "",
            vec![ToolCall {
                id: "toolu_abc".to_string(),
                name: "search".to_string(),
                input: json!({"q": "x"}),
            }],
        );
        let result = Message::tool_results(vec![thinklang_core::ToolOutcome {
            tool_call_id: "toolu_abc".to_string(),
            output: json!("found"),
            is_error: false,
        }]);

        let wire_assistant = to_wire_message(&assistant);
        let wire_result = to_wire_message(&result);

        assert_eq!(wire_assistant["content"][0]["id"], json!("toolu_abc"));
        assert_eq!(
            wire_result["content"][0]["tool_use_id"],
            json!("toolu_abc")
        );
    }
}
