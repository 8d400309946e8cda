//! ThinkLang Runtime
//!
//! Everything that happens after code generation: the `think` / `infer` /
//! `reason` call pipeline, the agent loop, the bulk-data operators, the
//! program evaluator, and the test framework. All state a call needs lives
//! in a [`Runtime`] handle; a process-wide default handle exists for
//! convenience.

mod agent;
mod batch;
mod call;
mod chunk;
mod dataset;
mod eval;
mod mapreduce;
mod pure;
mod stream;
mod testing;

pub use agent::*;
pub use batch::*;
pub use call::*;
pub use chunk::*;
pub use dataset::*;
pub use eval::*;
pub use mapreduce::*;
pub use stream::*;
pub use testing::*;

use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};
use thinklang_core::{CostTracker, ExactMatchCache, RuntimeConfig, ThinkResult};
use thinklang_llm::Provider;

/// The runtime handle: provider, cache, cost tracker, and configuration.
///
/// Overrides share the cache and tracker with their parent, so a cost
/// delta measured across an override is meaningful.
pub struct Runtime {
    provider: RwLock<Option<Arc<dyn Provider>>>,
    pub cache: Arc<ExactMatchCache>,
    pub tracker: Arc<CostTracker>,
    pub config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            provider: RwLock::new(None),
            cache: Arc::new(ExactMatchCache::new(config.cache_ttl, config.cache_enabled)),
            tracker: Arc::new(CostTracker::new()),
            config,
        }
    }

    pub fn with_provider(provider: Arc<dyn Provider>, config: RuntimeConfig) -> Self {
        let runtime = Self::new(config);
        runtime.set_provider(provider);
        runtime
    }

    /// Swap this handle's provider.
    pub fn set_provider(&self, provider: Arc<dyn Provider>) {
        if let Ok(mut current) = self.provider.write() {
            *current = Some(provider);
        }
    }

    /// This handle's provider, falling back to the process-wide one.
    pub fn provider(&self) -> ThinkResult<Arc<dyn Provider>> {
        if let Ok(current) = self.provider.read() {
            if let Some(provider) = current.as_ref() {
                return Ok(Arc::clone(provider));
            }
        }
        thinklang_llm::current_provider()
    }

    /// A new handle with a different provider but shared cache, tracker,
    /// and configuration. The test framework uses this for replay/record.
    pub fn override_provider(&self, provider: Arc<dyn Provider>) -> Runtime {
        Runtime {
            provider: RwLock::new(Some(provider)),
            cache: Arc::clone(&self.cache),
            tracker: Arc::clone(&self.tracker),
            config: self.config.clone(),
        }
    }

    /// The process-wide default handle, configured from the environment.
    pub fn global() -> &'static Runtime {
        static GLOBAL: Lazy<Runtime> = Lazy::new(|| Runtime::new(RuntimeConfig::from_env()));
        &GLOBAL
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}
