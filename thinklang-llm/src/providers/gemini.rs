//! Google Gemini generateContent provider
//!
//! Gemini does not issue tool-call ids; this client synthesises stable
//! `call_<n>` ids and maps them back to function names when the transcript
//! is converted, so the id round-trip contract holds for callers.

use super::{map_error_status, transport_error, RequestPacer};
use crate::{Completion, CompletionRequest, Provider, StopReason, TokenUsage};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use thinklang_core::{Message, ProviderError, Role, ThinkResult, ToolCall};

const PROVIDER: &str = "gemini";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    pacer: RequestPacer,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            pacer: RequestPacer::new(60),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        let contents = match &request.messages {
            Some(transcript) => {
                let mut id_to_name = HashMap::new();
                transcript
                    .iter()
                    .map(|m| to_wire_content(m, &mut id_to_name))
                    .collect::<Vec<_>>()
            }
            None => vec![json!({
                "role": "user",
                "parts": [{"text": request.user_message}],
            })],
        };

        let mut body = json!({"contents": contents});

        if !request.system_prompt.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": request.system_prompt}]});
        }

        let mut generation = Map::new();
        if let Some(max_tokens) = request.max_tokens {
            generation.insert("maxOutputTokens".into(), json!(max_tokens));
        }
        if let Some(stops) = &request.stop_sequences {
            generation.insert("stopSequences".into(), json!(stops));
        }
        if let Some(schema) = &request.json_schema {
            generation.insert("responseMimeType".into(), json!("application/json"));
            generation.insert("responseSchema".into(), strip_closed_markers(schema));
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }

        if let Some(tools) = &request.tools {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": strip_closed_markers(&t.input_schema),
                    })
                })
                .collect();
            body["tools"] = json!([{"functionDeclarations": declarations}]);
        }

        body
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn complete(&self, request: CompletionRequest) -> ThinkResult<Completion> {
        let _permit = self.pacer.acquire().await;

        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = self.build_body(&request);

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let response = self
            .client
            .post(&url)
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

        let candidate = wire
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "no candidates in response".to_string(),
            })?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for (index, part) in candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    id: format!("call_{}", index),
                    name: call.name,
                    input: call.args.unwrap_or(Value::Null),
                });
            }
        }

        let data = if request.json_schema.is_some() {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        let stop_reason = if !tool_calls.is_empty() {
            StopReason::ToolUse
        } else {
            match candidate.finish_reason.as_deref() {
                Some("MAX_TOKENS") => StopReason::MaxTokens,
                Some("STOP") if request.stop_sequences.is_some() => StopReason::StopSequence,
                _ => StopReason::EndTurn,
            }
        };

        let usage = wire
            .usage_metadata
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        Ok(Completion {
            data,
            usage,
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

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Gemini's schema dialect rejects `additionalProperties`; strip the
/// closed-object markers on the way out.
fn strip_closed_markers(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                if key == "additionalProperties" {
                    continue;
                }
                out.insert(key.clone(), strip_closed_markers(value));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_closed_markers).collect()),
        other => other.clone(),
    }
}

fn to_wire_content(message: &Message, id_to_name: &mut HashMap<String, String>) -> Value {
    match message.role {
        Role::User => json!({
            "role": "user",
            "parts": [{"text": message.content}],
        }),
        Role::Assistant => {
            let mut parts = Vec::new();
            if !message.content.is_empty() {
                parts.push(json!({"text": message.content}));
            }
            for call in message.tool_calls.iter().flatten() {
                id_to_name.insert(call.id.clone(), call.name.clone());
                parts.push(json!({
                    "functionCall": {"name": call.name, "args": call.input},
                }));
            }
            json!({"role": "model", "parts": parts})
        }
        Role::ToolResult => {
            let parts: Vec<Value> = message
                .tool_results
                .iter()
                .flatten()
                .map(|result| {
                    let name = id_to_name
                        .get(&result.tool_call_id)
                        .cloned()
                        .unwrap_or_else(|| result.tool_call_id.clone());
                    json!({
                        "functionResponse": {
                            "name": name,
                            "response": {"result": result.output},
                        },
                    })
                })
                .collect();
            json!({"role": "user", "parts": parts})
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    content: Option<WireContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
struct WirePart {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<WireFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    args: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
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
    fn closed_markers_are_stripped_for_the_wire() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "inner": {"type": "object", "additionalProperties": false, "properties": {}}
            }
        });
        let stripped = strip_closed_markers(&schema);
        assert!(stripped.get("additionalProperties").is_none());
        assert!(stripped["properties"]["inner"]
            .get("additionalProperties")
            .is_none());
    }

    #[test]
    fn tool_results_map_back_to_function_names() {
        let mut id_to_name = HashMap::new();
        let assistant = Message::assistant_tool_calls(
            "",
            vec![ToolCall {
                id: "call_0".to_string(),
                name: "search".to_string(),
                input: json!({"q": "x"}),
            }],
        );
        to_wire_content(&assistant, &mut id_to_name);

        let result = Message::tool_results(vec![thinklang_core::ToolOutcome {
            tool_call_id: "call_0".to_string(),
            output: json!("hit"),
            is_error: false,
        }]);
        let wire = to_wire_content(&result, &mut id_to_name);
        assert_eq!(wire["parts"][0]["functionResponse"]["name"], json!("search"));
    }
}
