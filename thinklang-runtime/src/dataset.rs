//! Lazy Dataset pipeline

use crate::{batch, chunk_array, BatchOptions, Runtime};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thinklang_core::{ThinkError, ThinkResult};

pub type StageFuture<T> = Pin<Box<dyn Future<Output = ThinkResult<T>> + Send>>;
pub type MapFn = Arc<dyn Fn(Value, usize) -> StageFuture<Value> + Send + Sync>;
pub type FilterFn = Arc<dyn Fn(Value, usize) -> StageFuture<bool> + Send + Sync>;
pub type FlatMapFn = Arc<dyn Fn(Value, usize) -> StageFuture<Vec<Value>> + Send + Sync>;

#[derive(Clone)]
enum DatasetOp {
    Map(MapFn),
    Filter(FilterFn),
    FlatMap(FlatMapFn),
    Batch(usize),
}

impl std::fmt::Debug for DatasetOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Map(_) => write!(f, "Map"),
            Self::Filter(_) => write!(f, "Filter"),
            Self::FlatMap(_) => write!(f, "FlatMap"),
            Self::Batch(size) => write!(f, "Batch({})", size),
        }
    }
}

/// A lazy chainable collection. Operators queue until `execute`, which
/// materialises each stage through `batch` so concurrency, cost budget,
/// abort, rate limit, and progress apply to every stage.
#[derive(Clone, Debug)]
pub struct Dataset {
    items: Vec<Value>,
    ops: Vec<DatasetOp>,
}

impl Dataset {
    pub fn from_items(items: Vec<Value>) -> Self {
        Self {
            items,
            ops: Vec::new(),
        }
    }

    pub fn map<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ThinkResult<Value>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.ops.push(DatasetOp::Map(Arc::new(move |value, index| {
            Box::pin(f(value, index))
        })));
        self
    }

    pub fn filter<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ThinkResult<bool>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.ops
            .push(DatasetOp::Filter(Arc::new(move |value, index| {
                Box::pin(f(value, index))
            })));
        self
    }

    pub fn flat_map<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ThinkResult<Vec<Value>>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.ops
            .push(DatasetOp::FlatMap(Arc::new(move |value, index| {
                Box::pin(f(value, index))
            })));
        self
    }

    /// Group the current items into arrays of `size`.
    pub fn batch_by(mut self, size: usize) -> Self {
        self.ops.push(DatasetOp::Batch(size));
        self
    }

    /// Replay the queued operators, materialising each stage through the
    /// batch operator. Ordering is preserved because batch returns items
    /// sorted by index.
    pub async fn execute(
        &self,
        runtime: &Arc<Runtime>,
        options: BatchOptions,
    ) -> ThinkResult<Vec<Value>> {
        let mut current = self.items.clone();

        for op in &self.ops {
            if let Some(abort) = &options.abort {
                if abort.is_aborted() {
                    return Err(ThinkError::BatchAborted);
                }
            }

            match op {
                DatasetOp::Map(f) => {
                    let f = Arc::clone(f);
                    let result = batch(
                        runtime,
                        current,
                        move |value, index| {
                            let f = Arc::clone(&f);
                            async move { f(value, index).await }
                        },
                        options.clone(),
                    )
                    .await?;
                    fail_on_stage_error(&result.errors)?;
                    current = result.results.into_iter().map(|r| r.data).collect();
                }
                DatasetOp::Filter(f) => {
                    let f = Arc::clone(f);
                    let result = batch(
                        runtime,
                        current.clone(),
                        move |value, index| {
                            let f = Arc::clone(&f);
                            async move { Ok(Value::Bool(f(value, index).await?)) }
                        },
                        options.clone(),
                    )
                    .await?;
                    fail_on_stage_error(&result.errors)?;
                    let keep: Vec<bool> = result
                        .results
                        .iter()
                        .map(|r| r.data.as_bool().unwrap_or(false))
                        .collect();
                    current = current
                        .into_iter()
                        .zip(keep)
                        .filter_map(|(value, keep)| keep.then_some(value))
                        .collect();
                }
                DatasetOp::FlatMap(f) => {
                    let f = Arc::clone(f);
                    let result = batch(
                        runtime,
                        current,
                        move |value, index| {
                            let f = Arc::clone(&f);
                            async move { Ok(Value::Array(f(value, index).await?)) }
                        },
                        options.clone(),
                    )
                    .await?;
                    fail_on_stage_error(&result.errors)?;
                    current = result
                        .results
                        .into_iter()
                        .flat_map(|r| match r.data {
                            Value::Array(items) => items,
                            other => vec![other],
                        })
                        .collect();
                }
                DatasetOp::Batch(size) => {
                    current = chunk_array(&current, *size)?
                        .into_iter()
                        .map(Value::Array)
                        .collect();
                }
            }
        }

        Ok(current)
    }

    /// Execute the pipeline, then fold the results.
    pub async fn reduce<F>(
        &self,
        runtime: &Arc<Runtime>,
        f: F,
        init: Value,
        options: BatchOptions,
    ) -> ThinkResult<Value>
    where
        F: Fn(Value, Value) -> Value,
    {
        let items = self.execute(runtime, options).await?;
        Ok(items.into_iter().fold(init, |acc, item| f(acc, item)))
    }
}

fn fail_on_stage_error(errors: &[crate::BatchItemError]) -> ThinkResult<()> {
    match errors.first() {
        Some(first) => Err(ThinkError::Runtime {
            message: format!("dataset stage failed at item {}: {}", first.index, first.error),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use thinklang_core::RuntimeConfig;

    fn runtime() -> Arc<Runtime> {
        Arc::new(Runtime::new(RuntimeConfig::default()))
    }

    #[tokio::test]
    async fn pipeline_preserves_order() {
        let rt = runtime();
        let out = Dataset::from_items((1..=6).map(|n| json!(n)).collect())
            .map(|v, _| async move { Ok(json!(v.as_i64().unwrap_or(0) * 10)) })
            .filter(|v, _| async move { Ok(v.as_i64().unwrap_or(0) > 20) })
            .execute(
                &rt,
                BatchOptions {
                    max_concurrency: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(out, vec![json!(30), json!(40), json!(50), json!(60)]);
    }

    #[tokio::test]
    async fn flat_map_and_batch_by() {
        let rt = runtime();
        let out = Dataset::from_items(vec![json!(1), json!(2)])
            .flat_map(|v, _| async move {
                let n = v.as_i64().unwrap_or(0);
                Ok(vec![json!(n), json!(n * 100)])
            })
            .batch_by(2)
            .execute(&rt, BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(
            out,
            vec![json!([1, 100]), json!([2, 200])]
        );
    }

    #[tokio::test]
    async fn reduce_folds_results() {
        let rt = runtime();
        let sum = Dataset::from_items((1..=4).map(|n| json!(n)).collect())
            .reduce(
                &rt,
                |acc, item| {
                    json!(acc.as_i64().unwrap_or(0) + item.as_i64().unwrap_or(0))
                },
                json!(0),
                BatchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(sum, json!(10));
    }

    #[tokio::test]
    async fn abort_surfaces_batch_aborted() {
        let rt = runtime();
        let abort = thinklang_core::AbortSignal::new();
        abort.abort();

        let err = Dataset::from_items(vec![json!(1)])
            .map(|v, _| async move { Ok(v) })
            .execute(
                &rt,
                BatchOptions {
                    abort: Some(abort),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "BatchAbortedError");
    }
}
