//! Scripted provider for tests

use crate::{Completion, CompletionRequest, Provider, StopReason, TokenUsage};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use thinklang_core::{ThinkError, ThinkResult};

/// A provider that plays back a queue of predetermined completions and
/// records every request it receives.
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<ThinkResult<Completion>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    /// Served again once the queue drains, when set.
    repeat_last: Mutex<Option<Completion>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            repeat_last: Mutex::new(None),
        }
    }

    /// Queue a plain structured value with nominal usage.
    pub fn push_value(&self, value: Value) {
        self.push(Ok(completion_of(value, StopReason::EndTurn, Vec::new())));
    }

    /// Queue a turn that requests tool calls.
    pub fn push_tool_use(&self, calls: Vec<thinklang_core::ToolCall>) {
        self.push(Ok(completion_of(
            Value::String(String::new()),
            StopReason::ToolUse,
            calls,
        )));
    }

    pub fn push_error(&self, error: ThinkError) {
        self.push(Err(error));
    }

    pub fn push(&self, result: ThinkResult<Completion>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(result);
        }
    }

    /// After the queue drains, keep serving this completion forever.
    pub fn repeat(&self, completion: Completion) {
        if let Ok(mut repeat) = self.repeat_last.lock() {
            *repeat = Some(completion);
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().ok()?.last().cloned()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn completion_of(
    data: Value,
    stop_reason: StopReason,
    tool_calls: Vec<thinklang_core::ToolCall>,
) -> Completion {
    Completion {
        data,
        usage: TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        },
        model: "scripted".to_string(),
        tool_calls,
        stop_reason,
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> ThinkResult<Completion> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        if let Ok(mut queue) = self.queue.lock() {
            if let Some(result) = queue.pop_front() {
                return result;
            }
        }

        if let Ok(repeat) = self.repeat_last.lock() {
            if let Some(completion) = repeat.as_ref() {
                return Ok(completion.clone());
            }
        }

        Err(ThinkError::Runtime {
            message: "scripted provider queue exhausted".to_string(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted"
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("calls", &self.call_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn plays_back_in_order_and_counts_calls() {
        let provider = ScriptedProvider::new();
        provider.push_value(json!("a"));
        provider.push_value(json!("b"));

        let first = provider.complete(CompletionRequest::default()).await.unwrap();
        let second = provider.complete(CompletionRequest::default()).await.unwrap();

        assert_eq!(first.data, json!("a"));
        assert_eq!(second.data, json!("b"));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn repeat_serves_after_queue_drains() {
        let provider = ScriptedProvider::new();
        provider.repeat(completion_of(json!("again"), StopReason::EndTurn, Vec::new()));

        for _ in 0..3 {
            let completion = provider.complete(CompletionRequest::default()).await.unwrap();
            assert_eq!(completion.data, json!("again"));
        }
    }
}
