//! Streaming AI calls
//!
//! Lazy sequences of per-chunk results. A single consumer drives the
//! stream; chunks are processed sequentially as the consumer polls.

use crate::{chunk_text, infer, think, AiValue, CallOptions, ChunkOptions, Runtime};
use futures_util::stream::{unfold, Stream, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use thinklang_core::ThinkResult;

/// One event of a streaming call.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub index: usize,
    pub data: AiValue,
    pub total_chunks: usize,
}

/// Chunk the prompt, then `think` each chunk in order. Chunk position is
/// exposed to the model through `__chunk_index` / `__total_chunks`.
pub fn stream_think(
    runtime: Arc<Runtime>,
    prompt: String,
    options: CallOptions,
    chunking: ChunkOptions,
) -> impl Stream<Item = ThinkResult<StreamEvent>> {
    let chunked = chunk_text(&prompt, &chunking);
    let total_chunks = chunked.total_chunks;

    unfold(
        (runtime, options, chunked.chunks.into_iter().enumerate()),
        move |(runtime, options, mut chunks)| async move {
            let (index, chunk) = chunks.next()?;

            let mut chunk_options = options.clone();
            chunk_options
                .context
                .insert("__chunk_index".to_string(), json!(index));
            chunk_options
                .context
                .insert("__total_chunks".to_string(), json!(total_chunks));

            let item = think(&runtime, &chunk, chunk_options)
                .await
                .map(|data| StreamEvent {
                    index,
                    data,
                    total_chunks,
                });

            Some((item, (runtime, options, chunks)))
        },
    )
}

/// `infer` over a sequence of values, lazily.
pub fn stream_infer(
    runtime: Arc<Runtime>,
    values: Vec<Value>,
    hint: Option<String>,
    options: CallOptions,
) -> impl Stream<Item = ThinkResult<StreamEvent>> {
    let total_chunks = values.len();

    unfold(
        (runtime, hint, options, values.into_iter().enumerate()),
        move |(runtime, hint, options, mut values)| async move {
            let (index, value) = values.next()?;

            let mut item_options = options.clone();
            item_options
                .context
                .insert("__chunk_index".to_string(), json!(index));
            item_options
                .context
                .insert("__total_chunks".to_string(), json!(total_chunks));

            let item = infer(&runtime, &value, hint.as_deref(), item_options)
                .await
                .map(|data| StreamEvent {
                    index,
                    data,
                    total_chunks,
                });

            Some((item, (runtime, hint, options, values)))
        },
    )
}

/// Drain a stream into a vector, stopping at the first error.
pub async fn collect_stream<S>(stream: S) -> ThinkResult<Vec<StreamEvent>>
where
    S: Stream<Item = ThinkResult<StreamEvent>>,
{
    let mut events = Vec::new();
    let mut stream = std::pin::pin!(stream);
    while let Some(event) = stream.next().await {
        events.push(event?);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChunkStrategy;
    use thinklang_core::{JsonSchema, RuntimeConfig};
    use thinklang_llm::ScriptedProvider;

    #[tokio::test]
    async fn stream_think_yields_one_event_per_chunk() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_value(json!("first"));
        provider.push_value(json!("second"));
        let runtime = Arc::new(Runtime::with_provider(
            Arc::clone(&provider) as Arc<dyn thinklang_llm::Provider>,
            RuntimeConfig::default(),
        ));

        let prompt = format!("{}\n\n{}", "a".repeat(40), "b".repeat(40));
        let events = collect_stream(stream_think(
            runtime,
            prompt,
            CallOptions {
                json_schema: Some(JsonSchema::string()),
                ..Default::default()
            },
            ChunkOptions {
                max_chars: Some(45),
                strategy: ChunkStrategy::Paragraph,
                ..Default::default()
            },
        ))
        .await
        .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].index, 0);
        assert_eq!(events[1].index, 1);
        assert_eq!(events[0].total_chunks, 2);
        assert_eq!(events[0].data, AiValue::Plain(json!("first")));

        // Chunk position rode along in the context.
        let request = provider.requests()[1].clone();
        assert!(request.user_message.contains("__chunk_index"));
    }

    #[tokio::test]
    async fn stream_infer_iterates_values() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_value(json!("x"));
        provider.push_value(json!("y"));
        provider.push_value(json!("z"));
        let runtime = Arc::new(Runtime::with_provider(
            provider,
            RuntimeConfig::default(),
        ));

        let events = collect_stream(stream_infer(
            runtime,
            vec![json!(1), json!(2), json!(3)],
            None,
            CallOptions {
                json_schema: Some(JsonSchema::string()),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[2].data, AiValue::Plain(json!("z")));
    }
}
