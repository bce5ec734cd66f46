// ARCHITECTURE: Trait-Based Inference Backend Abstraction
//
// The native inference handle is modeled as an opaque resource behind a
// small trait with run / close / is_loaded. One implementation per
// backend (a remote OpenAI-style completion server and an offline
// mock), selected once at configuration time, never mixed at the call
// site.
// The registry exclusively owns every handle and serializes calls into
// it with a per-model lock, so `run` can take `&mut self`.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};
use crate::models::descriptor::{GenerationParams, ModelDescriptor};

/// Backend family, selected at configuration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceMode {
    /// Deterministic offline stub. Used when no inference endpoint is
    /// configured, and by the test suites.
    Mock,
    /// llama.cpp-compatible completion server reached over HTTP.
    Remote { endpoint: String },
}

impl InferenceMode {
    pub fn label(&self) -> &'static str {
        match self {
            InferenceMode::Mock => "mock",
            InferenceMode::Remote { .. } => "remote",
        }
    }
}

/// Opaque native inference handle.
///
/// `run` is `&mut self`: backends are not assumed reentrant, and the
/// registry's per-key mutex is the only path to a handle.
#[async_trait]
pub trait InferenceHandle: Send + Sync + Debug {
    async fn run(&mut self, prompt: &str, params: &GenerationParams) -> Result<String>;

    /// Release backend resources deterministically. Idempotent.
    fn close(&mut self);

    fn is_loaded(&self) -> bool;
}

const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// Validate the descriptor's model file the way the native loader
/// would: the path must resolve and the file must carry the GGUF magic.
async fn validate_model_file(descriptor: &ModelDescriptor) -> Result<()> {
    if !descriptor.path.exists() {
        return Err(Error::ModelFileMissing(descriptor.path.clone()));
    }
    let mut file = tokio::fs::File::open(&descriptor.path).await.map_err(|e| {
        Error::ModelLoad {
            key: descriptor.key.clone(),
            reason: format!("cannot open model file: {e}"),
        }
    })?;
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).await.is_err() || magic != GGUF_MAGIC {
        return Err(Error::ModelLoad {
            key: descriptor.key.clone(),
            reason: format!(
                "backend rejected model file {}: not a GGUF model",
                descriptor.path.display()
            ),
        });
    }
    Ok(())
}

/// Open a handle for the descriptor under the configured mode.
pub(crate) async fn open_handle(
    mode: &InferenceMode,
    descriptor: &ModelDescriptor,
) -> Result<Box<dyn InferenceHandle>> {
    validate_model_file(descriptor).await?;
    match mode {
        InferenceMode::Mock => Ok(Box::new(MockHandle::new(descriptor))),
        InferenceMode::Remote { endpoint } => {
            Ok(Box::new(RemoteHandle::new(descriptor, endpoint.clone())))
        }
    }
}

/// Offline stub backend. Produces deterministic canned text so the
/// control plane (lifecycle, caching, fallback, telemetry) can be
/// exercised on machines without a real inference engine.
#[derive(Debug)]
pub struct MockHandle {
    key: String,
    loaded: bool,
}

impl MockHandle {
    fn new(descriptor: &ModelDescriptor) -> Self {
        Self {
            key: descriptor.key.clone(),
            loaded: true,
        }
    }
}

#[async_trait]
impl InferenceHandle for MockHandle {
    async fn run(&mut self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        if !self.loaded {
            return Err(Error::Inference {
                key: self.key.clone(),
                reason: "handle already closed".to_string(),
            });
        }
        let templates = [
            "Mock response from '{key}': '{prompt}'. Configure an inference endpoint for real generation.",
            "Placeholder answer from '{key}' for: '{prompt}'.",
            "Offline mock mode active on '{key}'. Received: '{prompt}'.",
        ];
        // Deterministic template pick so repeated prompts cache cleanly.
        let index = prompt
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_add(b as usize))
            % templates.len();
        Ok(templates[index]
            .replace("{key}", &self.key)
            .replace("{prompt}", prompt))
    }

    fn close(&mut self) {
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }
}

/// Remote completion backend speaking the llama.cpp server protocol.
pub struct RemoteHandle {
    key: String,
    endpoint: String,
    max_tokens: usize,
    temperature: f32,
    client: Option<reqwest::Client>,
}

impl Debug for RemoteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("key", &self.key)
            .field("endpoint", &self.endpoint)
            .field("loaded", &self.client.is_some())
            .finish()
    }
}

impl RemoteHandle {
    fn new(descriptor: &ModelDescriptor, endpoint: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .ok();
        Self {
            key: descriptor.key.clone(),
            endpoint,
            max_tokens: descriptor.max_tokens,
            temperature: descriptor.temperature,
            client,
        }
    }
}

#[async_trait]
impl InferenceHandle for RemoteHandle {
    async fn run(&mut self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let client = self.client.as_ref().ok_or_else(|| Error::Inference {
            key: self.key.clone(),
            reason: "handle already closed".to_string(),
        })?;

        let body = json!({
            "prompt": prompt,
            "n_predict": params.max_tokens.unwrap_or(self.max_tokens),
            "temperature": params.temperature.unwrap_or(self.temperature),
            "stop": ["Human:", "User:", "\n\n"],
            "stream": false,
        });

        let url = format!("{}/completion", self.endpoint.trim_end_matches('/'));
        let response = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Inference {
                key: self.key.clone(),
                reason: format!("request to {url} failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(Error::Inference {
                key: self.key.clone(),
                reason: format!("completion server returned {}", response.status()),
            });
        }

        let payload: serde_json::Value =
            response.json().await.map_err(|e| Error::Inference {
                key: self.key.clone(),
                reason: format!("malformed completion response: {e}"),
            })?;

        payload
            .get("content")
            .and_then(|v| v.as_str())
            .map(|text| text.trim().to_string())
            .ok_or_else(|| Error::Inference {
                key: self.key.clone(),
                reason: "completion response missing 'content'".to_string(),
            })
    }

    fn close(&mut self) {
        self.client = None;
    }

    fn is_loaded(&self) -> bool {
        self.client.is_some()
    }
}
