// CONFIGURATION: Runtime Configuration Surface
//
// Everything tunable lives here: the model descriptor map, residency and
// fallback bounds, cache sizing, resource thresholds, and the selector's
// scoring weights. Environment variables allow runtime tuning without
// recompilation; defaults are sized for a small single-board device.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{InferenceMode, ModelDescriptor};
use crate::monitor::Thresholds;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Model key -> descriptor. Immutable after startup.
    pub models: HashMap<String, ModelDescriptor>,
    /// Upper bound on concurrently resident models.
    pub max_resident_models: usize,
    /// Total inference attempts per request across the fallback chain.
    pub max_fallback_attempts: usize,
    pub cache: CacheConfig,
    pub thresholds: Thresholds,
    /// Seconds between auto-optimizer ticks.
    pub monitor_interval_secs: u64,
    pub scoring: ScoringWeights,
    pub inference_mode: InferenceMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl_hours: f64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs_f64(self.ttl_hours * 3600.0)
    }
}

/// Selector scoring weights.
///
/// The defaults make applicability dominate performance: a well-matched
/// but slower model still beats a fast but irrelevant one, while
/// performance history breaks ties among equally applicable models.
/// Kept configurable so the weights can be tuned empirically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub age_group_match: f64,
    pub context_overlap: f64,
    pub success_rate: f64,
    pub response_time_penalty: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            age_group_match: 10.0,
            context_overlap: 5.0,
            success_rate: 5.0,
            response_time_penalty: 0.1,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // Small cache sized for a memory-constrained device.
            max_entries: env_parse("RUNTIME_CACHE_MAX_ENTRIES", 64),
            ttl_hours: env_parse("RUNTIME_CACHE_TTL_HOURS", 24.0),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            models: HashMap::new(),
            max_resident_models: env_parse("RUNTIME_MAX_RESIDENT_MODELS", 2),
            max_fallback_attempts: env_parse("RUNTIME_MAX_FALLBACK_ATTEMPTS", 3),
            cache: CacheConfig::default(),
            thresholds: Thresholds::default(),
            monitor_interval_secs: env_parse("RUNTIME_MONITOR_INTERVAL_SECS", 10),
            scoring: ScoringWeights::default(),
            inference_mode: match env::var("RUNTIME_INFERENCE_ENDPOINT") {
                Ok(endpoint) if !endpoint.is_empty() => InferenceMode::Remote { endpoint },
                _ => InferenceMode::Mock,
            },
        }
    }
}

impl RuntimeConfig {
    pub fn load() -> Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Register a model descriptor under its key.
    pub fn with_model(mut self, descriptor: ModelDescriptor) -> Self {
        self.models.insert(descriptor.key.clone(), descriptor);
        self
    }

    /// Fatal-at-startup validation. A malformed threshold or a zero
    /// bound is a configuration error, not something to retry.
    pub fn validate(&self) -> Result<()> {
        if self.max_resident_models == 0 {
            return Err(Error::Config(
                "max_resident_models must be at least 1".to_string(),
            ));
        }
        if self.max_fallback_attempts == 0 {
            return Err(Error::Config(
                "max_fallback_attempts must be at least 1".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(Error::Config("cache max_entries must be at least 1".to_string()));
        }
        if !self.cache.ttl_hours.is_finite() || self.cache.ttl_hours <= 0.0 {
            return Err(Error::Config(format!(
                "cache ttl_hours must be a positive number, got {}",
                self.cache.ttl_hours
            )));
        }
        self.thresholds.validate()?;
        for (key, descriptor) in &self.models {
            if key != &descriptor.key {
                return Err(Error::Config(format!(
                    "model map key '{}' does not match descriptor key '{}'",
                    key, descriptor.key
                )));
            }
            descriptor.validate()?;
        }
        Ok(())
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
