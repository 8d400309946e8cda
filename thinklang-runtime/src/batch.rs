//! Bounded-concurrency batch operator

use crate::Runtime;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thinklang_core::{AbortSignal, ThinkError, ThinkResult};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Per-item error policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnError {
    #[default]
    Continue,
    FailFast,
}

pub type ItemCompleteHook = Arc<dyn Fn(usize, &ThinkResult<Value>) + Send + Sync>;
pub type ProgressHook = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Clone, Default)]
pub struct BatchOptions {
    pub max_concurrency: Option<usize>,
    pub cost_budget: Option<f64>,
    pub on_error: OnError,
    pub on_item_complete: Option<ItemCompleteHook>,
    pub on_progress: Option<ProgressHook>,
    pub abort: Option<AbortSignal>,
    /// Minimum milliseconds between the starts of successive items.
    pub rate_limit_ms: Option<u64>,
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("max_concurrency", &self.max_concurrency)
            .field("cost_budget", &self.cost_budget)
            .field("on_error", &self.on_error)
            .field("rate_limit_ms", &self.rate_limit_ms)
            .finish()
    }
}

pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemResult {
    pub index: usize,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemError {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchResult {
    /// Sorted by original index.
    pub results: Vec<BatchItemResult>,
    /// Sorted by original index.
    pub errors: Vec<BatchItemError>,
    pub total_items: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub total_cost_usd: f64,
    pub total_duration_ms: u64,
}

/// Run `processor(item, index)` over the items under a concurrency cap.
/// Items start in index order; results are returned sorted by index.
pub async fn batch<T, F, Fut>(
    runtime: &Runtime,
    items: Vec<T>,
    processor: F,
    options: BatchOptions,
) -> ThinkResult<BatchResult>
where
    T: Send + 'static,
    F: Fn(T, usize) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ThinkResult<Value>> + Send + 'static,
{
    let started = Instant::now();
    let cost_before = runtime.tracker.total_cost();
    let total_items = items.len();
    let max_concurrency = options.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY).max(1);

    let semaphore = Arc::new(Semaphore::new(max_concurrency));
    let mut join_set: JoinSet<(usize, ThinkResult<Value>)> = JoinSet::new();

    let mut results: Vec<BatchItemResult> = Vec::new();
    let mut errors: Vec<BatchItemError> = Vec::new();
    let mut budget_exceeded: Option<ThinkError> = None;
    let mut stopped = false;
    let mut completed = 0usize;
    let mut last_start: Option<Instant> = None;

    // A panicking processor is recorded like any error.
    let settle = |joined: Result<(usize, ThinkResult<Value>), tokio::task::JoinError>| match joined
    {
        Ok(pair) => pair,
        Err(join_error) => (
            usize::MAX,
            Err(ThinkError::Runtime {
                message: format!("batch task failed: {}", join_error),
            }),
        ),
    };

    let drain_one = |(index, outcome): (usize, ThinkResult<Value>),
                     results: &mut Vec<BatchItemResult>,
                     errors: &mut Vec<BatchItemError>,
                     completed: &mut usize,
                     stopped: &mut bool| {
        if let Some(hook) = &options.on_item_complete {
            hook(index, &outcome);
        }
        match outcome {
            Ok(data) => results.push(BatchItemResult { index, data }),
            Err(error) => {
                if options.on_error == OnError::FailFast {
                    *stopped = true;
                }
                errors.push(BatchItemError {
                    index,
                    error: error.to_string(),
                });
            }
        }
        *completed += 1;
        if let Some(hook) = &options.on_progress {
            hook(*completed, total_items);
        }
    };

    for (index, item) in items.into_iter().enumerate() {
        // Suspension-point checks before each start.
        if stopped {
            break;
        }
        if let Some(abort) = &options.abort {
            if abort.is_aborted() {
                stopped = true;
                break;
            }
        }
        if let Some(budget) = options.cost_budget {
            let spent = runtime.tracker.total_cost() - cost_before;
            if spent >= budget {
                let error = ThinkError::BatchCostBudgetExceeded {
                    budget,
                    spent,
                };
                match options.on_error {
                    OnError::FailFast => budget_exceeded = Some(error),
                    OnError::Continue => errors.push(BatchItemError {
                        index,
                        error: error.to_string(),
                    }),
                }
                stopped = true;
                break;
            }
        }

        // FIFO starts: the permit is acquired before spawning, so at most
        // `max_concurrency` processors are ever in flight.
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ThinkError::Runtime {
                message: "batch semaphore closed".to_string(),
            })?;

        // Drain any finished tasks without blocking.
        while let Some(joined) = join_set.try_join_next() {
            drain_one(
                settle(joined),
                &mut results,
                &mut errors,
                &mut completed,
                &mut stopped,
            );
        }
        if stopped {
            drop(permit);
            break;
        }

        if let Some(rate_ms) = options.rate_limit_ms {
            if let Some(last) = last_start {
                let elapsed = last.elapsed();
                let min_gap = Duration::from_millis(rate_ms);
                if elapsed < min_gap {
                    tokio::time::sleep(min_gap - elapsed).await;
                }
            }
        }
        last_start = Some(Instant::now());

        let processor = processor.clone();
        join_set.spawn(async move {
            let outcome = processor(item, index).await;
            drop(permit);
            (index, outcome)
        });
    }

    // Pool drain: in-flight items settle naturally.
    while let Some(joined) = join_set.join_next().await {
        drain_one(
            settle(joined),
            &mut results,
            &mut errors,
            &mut completed,
            &mut stopped,
        );
    }

    if let Some(error) = budget_exceeded {
        return Err(error);
    }

    results.sort_by_key(|r| r.index);
    errors.sort_by_key(|e| e.index);

    Ok(BatchResult {
        success_count: results.len(),
        error_count: errors.len(),
        results,
        errors,
        total_items,
        total_cost_usd: runtime.tracker.total_cost() - cost_before,
        total_duration_ms: started.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thinklang_core::RuntimeConfig;

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default())
    }

    #[tokio::test]
    async fn results_are_sorted_by_index() {
        let rt = runtime();
        let result = batch(
            &rt,
            (0..6).collect::<Vec<i64>>(),
            |item, _index| async move {
                // Jittered completion order.
                let delay = 30 - (item * 5) as u64;
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(json!(item * 2))
            },
            BatchOptions {
                max_concurrency: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let data: Vec<Value> = result.results.iter().map(|r| r.data.clone()).collect();
        assert_eq!(data, vec![json!(0), json!(2), json!(4), json!(6), json!(8), json!(10)]);
        assert_eq!(result.success_count, 6);
        assert_eq!(result.error_count, 0);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_cap() {
        let rt = runtime();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let in_flight_outer = Arc::clone(&in_flight);
        let peak_outer = Arc::clone(&peak);

        batch(
            &rt,
            (0..20).collect::<Vec<i64>>(),
            move |item, _| {
                let in_flight = Arc::clone(&in_flight_outer);
                let peak = Arc::clone(&peak_outer);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!(item))
                }
            },
            BatchOptions {
                max_concurrency: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn continue_records_errors_and_keeps_going() {
        let rt = runtime();
        let result = batch(
            &rt,
            (0..5).collect::<Vec<i64>>(),
            |item, _| async move {
                if item == 2 {
                    Err(ThinkError::Timeout { duration_ms: 1 })
                } else {
                    Ok(json!(item))
                }
            },
            BatchOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.success_count, 4);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.errors[0].index, 2);
    }

    #[tokio::test]
    async fn fail_fast_stops_starting_new_items() {
        let rt = runtime();
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_outer = Arc::clone(&processed);

        let result = batch(
            &rt,
            (0..50).collect::<Vec<i64>>(),
            move |item, _| {
                let processed = Arc::clone(&processed_outer);
                async move {
                    processed.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if item == 0 {
                        Err(ThinkError::Timeout { duration_ms: 1 })
                    } else {
                        Ok(json!(item))
                    }
                }
            },
            BatchOptions {
                max_concurrency: Some(1),
                on_error: OnError::FailFast,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // The first error is recorded and the stop flag prevents a full run.
        assert_eq!(result.error_count, 1);
        assert!(processed.load(Ordering::SeqCst) < 50);
        assert!(result.success_count + result.error_count <= 50);
    }

    #[tokio::test]
    async fn abort_stops_new_starts() {
        let rt = runtime();
        let abort = AbortSignal::new();
        let abort_inner = abort.clone();

        let result = batch(
            &rt,
            (0..50).collect::<Vec<i64>>(),
            move |item, index| {
                let abort = abort_inner.clone();
                async move {
                    if index == 3 {
                        abort.abort();
                    }
                    Ok(json!(item))
                }
            },
            BatchOptions {
                max_concurrency: Some(2),
                abort: Some(abort.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(result.success_count < 50);
    }

    #[tokio::test]
    async fn rate_limit_spaces_starts() {
        let rt = runtime();
        let started = Instant::now();
        batch(
            &rt,
            (0..4).collect::<Vec<i64>>(),
            |item, _| async move { Ok(json!(item)) },
            BatchOptions {
                max_concurrency: Some(4),
                rate_limit_ms: Some(20),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        // Three gaps of at least 20ms between four starts.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn progress_hook_sees_every_completion() {
        let rt = runtime();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_hook = Arc::clone(&seen);

        batch(
            &rt,
            (0..7).collect::<Vec<i64>>(),
            |item, _| async move { Ok(json!(item)) },
            BatchOptions {
                on_progress: Some(Arc::new(move |completed, total| {
                    assert!(completed <= total);
                    seen_hook.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
