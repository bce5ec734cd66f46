use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the runtime.
///
/// Model and inference failures are recoverable through the selector's
/// fallback chain; only `AllModelsFailed` reaches a caller of the
/// context-generation path. `Config` errors are fatal at startup and
/// never retried. `ResourceSample` errors are logged by the monitor
/// loop and skipped, never propagated out of it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model file missing: {}", .0.display())]
    ModelFileMissing(PathBuf),

    #[error("Model load failure for '{key}': {reason}")]
    ModelLoad { key: String, reason: String },

    #[error("Inference error for '{key}': {reason}")]
    Inference { key: String, reason: String },

    #[error("Inference timed out after {0}ms")]
    Timeout(u64),

    #[error("All models failed after {attempts} attempts: {last}")]
    AllModelsFailed { attempts: usize, last: Box<Error> },

    #[error("Resource sample error: {0}")]
    ResourceSample(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the selector's fallback chain may retry another model
    /// after this failure. Load failures and missing files are treated
    /// exactly like per-call inference errors for retry purposes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ModelFileMissing(_)
                | Error::ModelLoad { .. }
                | Error::Inference { .. }
                | Error::Timeout(_)
        )
    }
}
