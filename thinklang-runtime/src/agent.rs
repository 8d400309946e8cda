//! The agent loop
//!
//! A bounded multi-turn conversation. Tools are exposed on every turn
//! except the last-chance turn, where they are withheld (and the final
//! schema supplied, when the caller gave one) so the model must answer
//! directly. Tool calls within a turn execute sequentially and their ids
//! are echoed verbatim in the next turn's results.

use crate::{with_retry, CallOptions, Runtime};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use thinklang_core::{
    check_guards, AbortSignal, Message, Operation, ThinkError, ThinkResult, Tool, ToolCall,
    ToolOutcome,
};
use thinklang_llm::{CompletionRequest, StopReason, TokenUsage, ToolSpec};

const AGENT_SYSTEM_PROMPT: &str = "You are a helpful assistant with access to tools. \
Use tools when they help; when you have enough information, respond directly with your final answer.";

pub type ToolCallHook = Arc<dyn Fn(&ToolCall) + Send + Sync>;
pub type ToolResultHook = Arc<dyn Fn(&ToolOutcome) + Send + Sync>;

/// Options for one agent invocation.
#[derive(Clone, Default)]
pub struct AgentOptions {
    pub call: CallOptions,
    pub tools: Vec<Tool>,
    pub max_turns: Option<u32>,
    pub abort: Option<AbortSignal>,
    pub on_tool_call: Option<ToolCallHook>,
    pub on_tool_result: Option<ToolResultHook>,
}

impl std::fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptions")
            .field("tools", &self.tools.len())
            .field("max_turns", &self.max_turns)
            .finish()
    }
}

/// One executed tool call, with the provider's id preserved.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallRecord {
    pub tool_call_id: String,
    pub name: String,
    pub input: Value,
    pub output: Value,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentResult {
    pub data: Value,
    pub turns: u32,
    pub total_usage: TokenUsage,
    pub tool_call_history: Vec<ToolCallRecord>,
}

/// Run the agent loop, retrying the whole loop on failure like any other
/// AI call.
pub async fn agent(
    runtime: &Runtime,
    prompt: &str,
    options: AgentOptions,
) -> ThinkResult<AgentResult> {
    let retry_count = options.call.retry_count;
    let fallback = options.call.fallback.clone();

    let attempt = with_retry(retry_count, runtime.config.retry_base_delay, || {
        run_loop(runtime, prompt, &options)
    })
    .await;

    match attempt {
        Ok(result) => Ok(result),
        Err(error) => match fallback {
            Some(fallback) => {
                tracing::debug!(error = %error, "agent exhausted retries, using fallback");
                Ok(AgentResult {
                    data: fallback().await?,
                    turns: 0,
                    total_usage: TokenUsage::default(),
                    tool_call_history: Vec::new(),
                })
            }
            None => Err(error),
        },
    }
}

async fn run_loop(
    runtime: &Runtime,
    prompt: &str,
    options: &AgentOptions,
) -> ThinkResult<AgentResult> {
    let provider = runtime.provider()?;
    let max_turns = options
        .max_turns
        .unwrap_or(runtime.config.default_max_turns)
        .max(1);

    // init: system prompt with pretty-JSON context appended when present.
    let mut system_prompt = AGENT_SYSTEM_PROMPT.to_string();
    if !options.call.context.is_empty() {
        let rendered =
            serde_json::to_string_pretty(&Value::Object(options.call.context.clone()))
                .unwrap_or_else(|_| "{}".to_string());
        system_prompt.push_str(&format!("\n\nContext: {}", rendered));
    }

    let tool_specs: Vec<ToolSpec> = options
        .tools
        .iter()
        .map(|tool| ToolSpec {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.to_value(),
        })
        .collect();

    let mut messages = vec![Message::user(prompt)];
    let mut turn: u32 = 0;
    let mut total_usage = TokenUsage::default();
    let mut history: Vec<ToolCallRecord> = Vec::new();

    while turn < max_turns {
        if let Some(abort) = &options.abort {
            if abort.is_aborted() {
                return Err(ThinkError::BatchAborted);
            }
        }

        turn += 1;
        let last_chance = turn == max_turns;

        // Tools are withheld on the last-chance turn; the final schema is
        // supplied only then (and only if the caller provided one).
        let schema_value = if last_chance {
            options.call.json_schema.as_ref().map(|s| s.to_value())
        } else {
            None
        };
        let request = CompletionRequest {
            system_prompt: system_prompt.clone(),
            user_message: prompt.to_string(),
            json_schema: schema_value,
            schema_name: options.call.schema_name.clone(),
            model: options
                .call
                .model
                .clone()
                .or(runtime.config.default_model.clone()),
            max_tokens: options.call.max_tokens,
            messages: Some(messages.clone()),
            tools: if last_chance || tool_specs.is_empty() {
                None
            } else {
                Some(tool_specs.clone())
            },
            ..Default::default()
        };

        let started = Instant::now();
        let completion = provider.complete(request).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        total_usage.accumulate(completion.usage);
        runtime.tracker.record(
            Operation::Agent,
            &completion.model,
            completion.usage.input_tokens,
            completion.usage.output_tokens,
            prompt,
            duration_ms,
        );

        if completion.stop_reason == StopReason::ToolUse && !completion.tool_calls.is_empty() {
            tracing::info!(turn, calls = completion.tool_calls.len(), "agent tool turn");

            let text = match &completion.data {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            messages.push(Message::assistant_tool_calls(
                text,
                completion.tool_calls.clone(),
            ));

            // Sequential execution in the order the provider emitted them.
            let mut results = Vec::new();
            for call in &completion.tool_calls {
                if let Some(hook) = &options.on_tool_call {
                    hook(call);
                }

                let outcome = match options.tools.iter().find(|t| t.name == call.name) {
                    Some(tool) => match tool.run(call.input.clone()).await {
                        Ok(output) => ToolOutcome {
                            tool_call_id: call.id.clone(),
                            output,
                            is_error: false,
                        },
                        Err(error) => ToolOutcome {
                            tool_call_id: call.id.clone(),
                            output: Value::String(format!(
                                "Tool '{}' failed: {}",
                                call.name, error
                            )),
                            is_error: true,
                        },
                    },
                    None => ToolOutcome {
                        tool_call_id: call.id.clone(),
                        output: Value::String(format!("Unknown tool: {}", call.name)),
                        is_error: true,
                    },
                };

                if let Some(hook) = &options.on_tool_result {
                    hook(&outcome);
                }

                history.push(ToolCallRecord {
                    tool_call_id: outcome.tool_call_id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                    output: outcome.output.clone(),
                    is_error: outcome.is_error,
                });
                results.push(outcome);
            }

            messages.push(Message::tool_results(results));
            continue;
        }

        // Terminal answer.
        check_guards(&options.call.guards, &completion.data)?;
        return Ok(AgentResult {
            data: completion.data,
            turns: turn,
            total_usage,
            tool_call_history: history,
        });
    }

    Err(ThinkError::AgentMaxTurns {
        max_turns,
        turns: turn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use thinklang_core::{JsonSchema, RuntimeConfig};
    use thinklang_llm::{Completion, ScriptedProvider};

    fn search_tool() -> Tool {
        Tool::from_fn(
            "search",
            "Search the index",
            JsonSchema::Object {
                properties: vec![("q".to_string(), JsonSchema::string())],
                required: vec!["q".to_string()],
                description: None,
            },
            |_input| async move { Ok(json!("result")) },
        )
    }

    fn tool_use_completion(id: &str, name: &str) -> Completion {
        Completion {
            data: json!(""),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
            model: "scripted".to_string(),
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                input: json!({"q": "x"}),
            }],
            stop_reason: StopReason::ToolUse,
        }
    }

    #[tokio::test]
    async fn two_turn_tool_conversation() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push(Ok(tool_use_completion("c1", "search")));
        provider.push_value(json!({"answer": "ok"}));
        let runtime = Runtime::with_provider(Arc::clone(&provider) as Arc<dyn thinklang_llm::Provider>, RuntimeConfig::default());

        let result = agent(
            &runtime,
            "find x",
            AgentOptions {
                tools: vec![search_tool()],
                max_turns: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(result.data, json!({"answer": "ok"}));
        assert_eq!(result.turns, 2);
        assert_eq!(result.tool_call_history.len(), 1);
        assert_eq!(result.tool_call_history[0].tool_call_id, "c1");
        assert_eq!(result.tool_call_history[0].output, json!("result"));

        // The second request carries the echoed id in the transcript.
        let second_request = provider.requests()[1].clone();
        let transcript = second_request.messages.unwrap();
        let results = transcript.last().unwrap().tool_results.clone().unwrap();
        assert_eq!(results[0].tool_call_id, "c1");
    }

    #[tokio::test]
    async fn exhaustion_raises_max_turns() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.repeat(tool_use_completion("c1", "search"));
        let runtime = Runtime::with_provider(provider, RuntimeConfig::default());

        let err = agent(
            &runtime,
            "loop forever",
            AgentOptions {
                tools: vec![search_tool()],
                max_turns: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

        match err {
            ThinkError::AgentMaxTurns { max_turns, turns } => {
                assert_eq!(max_turns, 2);
                assert_eq!(turns, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn last_chance_turn_withholds_tools_and_sends_schema() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push(Ok(tool_use_completion("c1", "search")));
        provider.push_value(json!({"answer": "forced"}));
        let runtime = Runtime::with_provider(Arc::clone(&provider) as Arc<dyn thinklang_llm::Provider>, RuntimeConfig::default());

        agent(
            &runtime,
            "solve",
            AgentOptions {
                call: CallOptions {
                    json_schema: Some(JsonSchema::Object {
                        properties: vec![("answer".to_string(), JsonSchema::string())],
                        required: vec!["answer".to_string()],
                        description: None,
                    }),
                    ..Default::default()
                },
                tools: vec![search_tool()],
                max_turns: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let requests = provider.requests();
        assert!(requests[0].tools.is_some());
        assert!(requests[0].json_schema.is_none());
        // Last-chance turn: no tools, schema present.
        assert!(requests[1].tools.is_none());
        assert!(requests[1].json_schema.is_some());
    }

    #[tokio::test]
    async fn unknown_tool_is_recorded_not_fatal() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push(Ok(tool_use_completion("c9", "no_such_tool")));
        provider.push_value(json!("done"));
        let runtime = Runtime::with_provider(provider, RuntimeConfig::default());

        let result = agent(
            &runtime,
            "go",
            AgentOptions {
                tools: vec![search_tool()],
                max_turns: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(result.tool_call_history.len(), 1);
        assert!(result.tool_call_history[0].is_error);
        assert!(result.tool_call_history[0]
            .output
            .as_str()
            .unwrap()
            .contains("Unknown tool"));
        assert_eq!(result.data, json!("done"));
    }

    #[tokio::test]
    async fn usage_accumulates_across_turns() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push(Ok(tool_use_completion("c1", "search")));
        provider.push_value(json!("fin"));
        let runtime = Runtime::with_provider(provider, RuntimeConfig::default());

        let result = agent(
            &runtime,
            "go",
            AgentOptions {
                tools: vec![search_tool()],
                max_turns: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(result.total_usage.input_tokens, 20);
        assert_eq!(result.total_usage.output_tokens, 10);
        // One cost record per turn.
        assert_eq!(runtime.tracker.get_records().len(), 2);
    }
}
