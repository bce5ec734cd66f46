pub mod optimizer;
pub mod sampler;

pub use optimizer::{
    Alert, AutoOptimizer, Metric, MonitorHooks, ResourceAverages, StatusLevel, Thresholds,
    WARNING_FRACTION,
};
pub use sampler::{ResourceSampler, ResourceSnapshot, SystemSampler};
