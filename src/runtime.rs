// ARCHITECTURE: Inference Runtime Facade
//
// One explicitly constructed object wires the registry, selector,
// cache, and auto-optimizer together and is passed by handle to every
// caller; there is no module-level singleton. Lifecycle (start /
// shutdown) is owned by the embedding application.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::cache::{CacheStats, ResponseCache};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::models::{
    GenerationParams, ModelPerformanceStats, ModelRegistry, ModelSelector, RequestContext,
};
use crate::monitor::{AutoOptimizer, MonitorHooks, SystemSampler};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a privacy-focused assistant running locally on a \
    small home network device. You help with network analysis, security assessment, and system \
    administration, entirely offline. Be helpful, concise, and security-conscious.";

/// Read-only introspection for health and status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfoReport {
    pub loaded: bool,
    pub inference_mode: &'static str,
    pub current_model: Option<String>,
    pub loaded_models: Vec<String>,
    pub performance_stats: HashMap<String, ModelPerformanceStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeCounters {
    pub queries_processed: u64,
    pub model_loads: u64,
    pub model_unloads: u64,
    pub memory_cleanups: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub cache: CacheStats,
    pub models: HashMap<String, ModelPerformanceStats>,
    pub counters: RuntimeCounters,
    pub uptime_secs: f64,
}

pub struct InferenceRuntime {
    registry: Arc<ModelRegistry>,
    cache: Arc<ResponseCache>,
    selector: ModelSelector,
    optimizer: AutoOptimizer,
    started_at: Instant,
    queries_processed: AtomicU64,
}

impl InferenceRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Self::with_hooks(config, MonitorHooks::default())
    }

    /// Construct with observer hooks for the monitor loop.
    pub fn with_hooks(config: RuntimeConfig, hooks: MonitorHooks) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ModelRegistry::new(
            config.models.clone(),
            config.inference_mode.clone(),
            config.max_resident_models,
        ));
        let cache = Arc::new(ResponseCache::new(
            config.cache.max_entries,
            config.cache.ttl(),
        ));
        let selector = ModelSelector::new(
            Arc::clone(&registry),
            config.scoring,
            config.max_fallback_attempts,
        );
        let optimizer = AutoOptimizer::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            config.thresholds,
            config.monitor_interval(),
            hooks,
        );

        info!(
            "Inference runtime initialized ({} models, mode: {})",
            registry.descriptors().len(),
            registry.mode().label()
        );

        Ok(Self {
            registry,
            cache,
            selector,
            optimizer,
            started_at: Instant::now(),
            queries_processed: AtomicU64::new(0),
        })
    }

    /// Start the background resource monitor on the live host sampler.
    pub async fn start(&self) {
        self.optimizer.start(SystemSampler::new()).await;
    }

    pub async fn shutdown(&self) {
        self.optimizer.stop().await;
        self.registry.unload_all().await;
        info!("Inference runtime shut down");
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    pub fn optimizer(&self) -> &AutoOptimizer {
        &self.optimizer
    }

    fn prepare_prompt(prompt: &str, system_prompt: Option<&str>) -> String {
        let system = system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT);
        format!("System: {system}\n\nHuman: {prompt}\n\nAssistant:")
    }

    /// Convenience wrapper: run the prompt on the default model for an
    /// unconstrained context.
    pub async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String> {
        self.generate_with_context(prompt, system_prompt, &RequestContext::default())
            .await
    }

    /// Full selector path: score all configured models against the
    /// request context and walk the fallback chain on failure. Repeat
    /// requests for the same prompt and context are served from the
    /// response cache.
    pub async fn generate_for_context(
        &self,
        prompt: &str,
        context: &RequestContext,
    ) -> Result<String> {
        self.generate_with_context(prompt, None, context).await
    }

    async fn generate_with_context(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        context: &RequestContext,
    ) -> Result<String> {
        self.queries_processed.fetch_add(1, Ordering::Relaxed);

        let mut contexts: Vec<&String> = context.contexts.iter().collect();
        contexts.sort();
        let kwargs = [
            ("age_group".to_string(), json!(context.age_group)),
            ("contexts".to_string(), json!(contexts)),
            ("system_prompt".to_string(), json!(system_prompt)),
        ];
        let key = ResponseCache::fingerprint("generate", &[json!(prompt)], &kwargs);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let full_prompt = Self::prepare_prompt(prompt, system_prompt);
        let text = self
            .selector
            .generate_for_context(&full_prompt, context, &GenerationParams::default())
            .await?;
        self.cache.put(&key, text.clone()).await;
        Ok(text)
    }

    /// Cache-aside wrapper for arbitrary computations: repeated
    /// `(identity, args, kwargs)` combinations are served from the
    /// response cache instead of recomputing.
    pub async fn cached_query<F, Fut, E>(
        &self,
        identity: &str,
        args: &[serde_json::Value],
        kwargs: &[(String, serde_json::Value)],
        ttl_override: Option<Duration>,
        compute: F,
    ) -> std::result::Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<String, E>>,
    {
        self.queries_processed.fetch_add(1, Ordering::Relaxed);
        self.cache
            .get_or_compute(identity, args, kwargs, ttl_override, compute)
            .await
    }

    pub async fn get_model_info(&self) -> ModelInfoReport {
        let loaded_models = self.registry.loaded_keys().await;
        ModelInfoReport {
            loaded: !loaded_models.is_empty(),
            inference_mode: self.registry.mode().label(),
            current_model: self.registry.current_model().await,
            loaded_models,
            performance_stats: self.registry.all_stats().await,
        }
    }

    pub async fn get_performance_metrics(&self) -> PerformanceMetrics {
        let cache = self.cache.stats().await;
        PerformanceMetrics {
            counters: RuntimeCounters {
                queries_processed: self.queries_processed.load(Ordering::Relaxed),
                model_loads: self.registry.total_loads(),
                model_unloads: self.registry.total_unloads(),
                memory_cleanups: self.optimizer.memory_cleanups(),
                cache_hits: cache.total_hits,
                cache_misses: cache.total_misses,
            },
            models: self.registry.all_stats().await,
            cache,
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}
