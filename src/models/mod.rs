pub mod backend;
pub mod descriptor;
pub mod registry;
pub mod selector;

pub use backend::{InferenceHandle, InferenceMode};
pub use descriptor::{GenerationParams, ModelDescriptor, RequestContext};
pub use registry::{ModelPerformanceStats, ModelRegistry};
pub use selector::ModelSelector;
