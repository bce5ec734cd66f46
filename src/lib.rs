//! Resource-constrained inference and cache runtime for on-device
//! language models.
//!
//! Decides which model variant serves a request context, keeps a
//! bounded number of models resident, serves repeat requests from a
//! TTL/LRU cache, and reacts to resource pressure (heat, memory, disk)
//! by evicting state before the device becomes unstable.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod monitor;
pub mod runtime;

pub use cache::{CacheStats, ResponseCache};
pub use config::{CacheConfig, RuntimeConfig, ScoringWeights};
pub use error::{Error, Result};
pub use models::{
    GenerationParams, InferenceHandle, InferenceMode, ModelDescriptor, ModelPerformanceStats,
    ModelRegistry, ModelSelector, RequestContext,
};
pub use monitor::{
    Alert, AutoOptimizer, Metric, MonitorHooks, ResourceSampler, ResourceSnapshot, StatusLevel,
    SystemSampler, Thresholds,
};
pub use runtime::{InferenceRuntime, ModelInfoReport, PerformanceMetrics, RuntimeCounters};
