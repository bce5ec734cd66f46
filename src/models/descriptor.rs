use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Declarative description of one configured model variant.
///
/// Created from configuration at startup and never mutated afterwards;
/// the registry treats the descriptor map as read-only for the process
/// lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique model key.
    pub key: String,
    /// Path to the model file. Opaque blob from the runtime's
    /// perspective, read-only.
    pub path: PathBuf,
    pub context_length: usize,
    pub max_tokens: usize,
    pub temperature: f32,
    pub thread_count: usize,
    /// Age groups this variant is applicable to ("child", "teen", ...).
    pub age_groups: HashSet<String>,
    /// Request contexts this variant is applicable to.
    pub contexts: HashSet<String>,
}

impl ModelDescriptor {
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            context_length: 4096,
            max_tokens: 512,
            temperature: 0.7,
            thread_count: 4,
            age_groups: HashSet::new(),
            contexts: HashSet::new(),
        }
    }

    pub fn with_age_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.age_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_contexts<I, S>(mut self, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contexts = contexts.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::Config("model key must not be empty".to_string()));
        }
        if self.context_length == 0 {
            return Err(Error::Config(format!(
                "model '{}': context_length must be at least 1",
                self.key
            )));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(Error::Config(format!(
                "model '{}': temperature must be a non-negative number",
                self.key
            )));
        }
        Ok(())
    }
}

/// Request context used by the selector to score model applicability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub age_group: Option<String>,
    pub contexts: HashSet<String>,
}

impl RequestContext {
    pub fn for_age_group(age_group: impl Into<String>) -> Self {
        Self {
            age_group: Some(age_group.into()),
            contexts: HashSet::new(),
        }
    }

    pub fn with_contexts<I, S>(mut self, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contexts = contexts.into_iter().map(Into::into).collect();
        self
    }
}

/// Per-call generation parameters. Unset fields fall back to the
/// descriptor's configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// Optional wall-clock bound on one `run` call. On expiry the
    /// caller gets `Timeout` back; the wait is abandoned, the handle is
    /// not forcibly interrupted, and the next caller for the same key
    /// queues behind it.
    pub timeout_ms: Option<u64>,
}
