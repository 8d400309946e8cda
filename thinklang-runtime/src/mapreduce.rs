//! `mapThink` and `reduceThink`

use crate::{batch, chunk_array, think, BatchOptions, BatchResult, CallOptions, Runtime};
use serde_json::{json, Value};
use std::sync::Arc;
use thinklang_core::{ThinkError, ThinkResult};

/// Template that renders one item into its prompt.
pub type PromptTemplate = Arc<dyn Fn(&Value, usize) -> String + Send + Sync>;

/// A batch whose processor is `think` over a per-item prompt. Item
/// position is exposed through `__item_index` / `__total_items`.
pub async fn map_think(
    runtime: &Arc<Runtime>,
    items: Vec<Value>,
    template: PromptTemplate,
    call_options: CallOptions,
    batch_options: BatchOptions,
) -> ThinkResult<BatchResult> {
    let total_items = items.len();
    let runtime_for_items = Arc::clone(runtime);

    batch(
        runtime,
        items,
        move |item, index| {
            let runtime = Arc::clone(&runtime_for_items);
            let template = Arc::clone(&template);
            let mut options = call_options.clone();
            async move {
                let prompt = template(&item, index);
                options
                    .context
                    .insert("__item_index".to_string(), json!(index));
                options
                    .context
                    .insert("__total_items".to_string(), json!(total_items));
                Ok(think(&runtime, &prompt, options).await?.into_plain())
            }
        },
        batch_options,
    )
    .await
}

/// Tree-reduce: partition into `batch_size` groups, `think` each group
/// with the group in context, and repeat on the per-group results until
/// one value remains. Fails fast on empty input.
pub async fn reduce_think(
    runtime: &Arc<Runtime>,
    items: Vec<Value>,
    prompt: &str,
    batch_size: usize,
    call_options: CallOptions,
    batch_options: BatchOptions,
) -> ThinkResult<Value> {
    if items.is_empty() {
        return Err(ThinkError::Runtime {
            message: "reduceThink requires a non-empty input".to_string(),
        });
    }
    let batch_size = batch_size.max(2);

    let mut current = items;
    loop {
        let groups = chunk_array(&current, batch_size)?;
        let total_groups = groups.len();
        let runtime_for_groups = Arc::clone(runtime);
        let prompt = prompt.to_string();
        let call_options = call_options.clone();

        let round = batch(
            runtime,
            groups,
            move |group, index| {
                let runtime = Arc::clone(&runtime_for_groups);
                let prompt = prompt.clone();
                let mut options = call_options.clone();
                async move {
                    options.context.insert("__group".to_string(), json!(group));
                    options
                        .context
                        .insert("__group_index".to_string(), json!(index));
                    options
                        .context
                        .insert("__total_groups".to_string(), json!(total_groups));
                    Ok(think(&runtime, &prompt, options).await?.into_plain())
                }
            },
            batch_options.clone(),
        )
        .await?;

        if !round.errors.is_empty() {
            return Err(ThinkError::Runtime {
                message: format!(
                    "reduceThink group failed: {}",
                    round.errors[0].error
                ),
            });
        }

        current = round.results.into_iter().map(|r| r.data).collect();
        if current.len() <= 1 {
            break;
        }
    }

    current.into_iter().next().ok_or(ThinkError::Runtime {
        message: "reduceThink produced no result".to_string(),
    })
}
