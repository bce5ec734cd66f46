// ARCHITECTURE: Model Registry & Lifecycle Manager
//
// DESIGN:
// The registry owns every native inference handle in the process. It
// keeps the configured descriptor map (immutable), the resident set
// (bounded by max_resident_models), and per-model performance telemetry
// for the process lifetime.
//
// LOCKING MODEL:
// 1. `resident` RwLock guards the resident map as a whole, so an
//    eviction decision never races a concurrent load of another key.
// 2. Each resident handle sits behind its own tokio Mutex; inference
//    calls against one native handle are never concurrent, different
//    keys run concurrently up to the residency bound.
// 3. Lock order is always resident -> current -> stats. No component
//    gets unsynchronized access; the auto-optimizer goes through the
//    same public API as every other caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::backend::{self, InferenceHandle, InferenceMode};
use crate::models::descriptor::{GenerationParams, ModelDescriptor};

/// Per-model performance telemetry. An entry exists for every key that
/// has ever been loaded and persists for the process lifetime; it is
/// never reset except through the explicit `reset_stats` operator call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPerformanceStats {
    pub load_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_response_time_secs: f64,
}

impl ModelPerformanceStats {
    pub fn attempts(&self) -> u64 {
        self.success_count + self.error_count
    }

    /// Success fraction. Defaults to 1.0 when no requests have been
    /// recorded yet: an optimistic prior so untried models are not
    /// starved by the selector.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.attempts();
        if attempts == 0 {
            1.0
        } else {
            self.success_count as f64 / attempts as f64
        }
    }

    pub fn avg_response_time_secs(&self) -> f64 {
        let attempts = self.attempts();
        if attempts == 0 {
            0.0
        } else {
            self.total_response_time_secs / attempts as f64
        }
    }
}

struct ResidentModel {
    handle: Arc<Mutex<Box<dyn InferenceHandle>>>,
    loaded_at: Instant,
}

pub struct ModelRegistry {
    descriptors: HashMap<String, ModelDescriptor>,
    mode: InferenceMode,
    max_resident: usize,
    resident: RwLock<HashMap<String, ResidentModel>>,
    current: RwLock<Option<String>>,
    stats: RwLock<HashMap<String, ModelPerformanceStats>>,
    model_loads: AtomicU64,
    model_unloads: AtomicU64,
}

impl ModelRegistry {
    pub fn new(
        descriptors: HashMap<String, ModelDescriptor>,
        mode: InferenceMode,
        max_resident: usize,
    ) -> Self {
        Self {
            descriptors,
            mode,
            max_resident: max_resident.max(1),
            resident: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            stats: RwLock::new(HashMap::new()),
            model_loads: AtomicU64::new(0),
            model_unloads: AtomicU64::new(0),
        }
    }

    pub fn descriptors(&self) -> &HashMap<String, ModelDescriptor> {
        &self.descriptors
    }

    pub fn descriptor(&self, key: &str) -> Result<&ModelDescriptor> {
        self.descriptors
            .get(key)
            .ok_or_else(|| Error::ModelNotFound(key.to_string()))
    }

    pub fn mode(&self) -> &InferenceMode {
        &self.mode
    }

    pub async fn is_resident(&self, key: &str) -> bool {
        self.resident.read().await.contains_key(key)
    }

    pub async fn loaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.resident.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn resident_count(&self) -> usize {
        self.resident.read().await.len()
    }

    pub async fn current_model(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    pub fn total_loads(&self) -> u64 {
        self.model_loads.load(Ordering::Relaxed)
    }

    pub fn total_unloads(&self) -> u64 {
        self.model_unloads.load(Ordering::Relaxed)
    }

    /// Load `key` into the resident set.
    ///
    /// Fails with `ModelNotFound` for unconfigured keys, `ModelFileMissing`
    /// when the descriptor's path does not resolve, and `ModelLoad` when
    /// the backend rejects the file. If loading would exceed the
    /// residency bound, the resident model with the smallest load count
    /// (ties broken by earliest load time) that is not the currently
    /// selected model is evicted first. Loading an already-resident key
    /// is a no-op success.
    pub async fn load(&self, key: &str) -> Result<()> {
        let descriptor = self.descriptor(key)?;
        if self.is_resident(key).await {
            return Ok(());
        }

        info!("🔄 Loading model: {} ({})", key, descriptor.path.display());
        let start = Instant::now();
        let handle = backend::open_handle(&self.mode, descriptor).await?;

        let mut fresh = Some(handle);
        let mut evicted: Option<(String, ResidentModel)> = None;
        let mut inserted = false;
        {
            let mut resident = self.resident.write().await;
            if !resident.contains_key(key) {
                if resident.len() >= self.max_resident {
                    let current = self.current.read().await.clone();
                    let stats = self.stats.read().await;
                    let victim = pick_eviction_victim(&resident, &stats, current.as_deref());
                    if let Some(victim_key) = victim {
                        evicted = resident.remove_entry(&victim_key);
                    }
                }
                resident.insert(
                    key.to_string(),
                    ResidentModel {
                        handle: Arc::new(Mutex::new(fresh.take().expect("fresh handle"))),
                        loaded_at: Instant::now(),
                    },
                );
                inserted = true;
            }
        }

        // Lost a race with a concurrent load of the same key: release
        // the redundant handle and report success.
        if let Some(mut redundant) = fresh {
            redundant.close();
        }

        if inserted {
            self.stats
                .write()
                .await
                .entry(key.to_string())
                .or_default()
                .load_count += 1;
            self.model_loads.fetch_add(1, Ordering::Relaxed);
            info!(
                "✅ Model '{}' loaded in {:.0}ms",
                key,
                start.elapsed().as_secs_f64() * 1000.0
            );
        }

        if let Some((victim_key, entry)) = evicted {
            self.close_entry(&victim_key, entry).await;
            info!("🗑️ Evicted model '{}' to stay within residency bound", victim_key);
        }

        Ok(())
    }

    /// Unload `key` from the resident set, releasing the native handle
    /// deterministically. Idempotent: unloading an already-unloaded key
    /// succeeds as a no-op.
    pub async fn unload(&self, key: &str) -> Result<()> {
        let removed = self.resident.write().await.remove_entry(key);
        match removed {
            None => Ok(()),
            Some((victim_key, entry)) => {
                self.close_entry(&victim_key, entry).await;
                info!("✅ Model '{}' unloaded", victim_key);
                Ok(())
            }
        }
    }

    /// Unload every resident model. Used at shutdown and by tests.
    pub async fn unload_all(&self) {
        let keys = self.loaded_keys().await;
        for key in keys {
            if let Err(e) = self.unload(&key).await {
                warn!("Failed to unload model '{}': {}", key, e);
            }
        }
    }

    async fn close_entry(&self, key: &str, entry: ResidentModel) {
        {
            let mut current = self.current.write().await;
            if current.as_deref() == Some(key) {
                *current = None;
            }
        }
        // Waits for any in-flight inference on this handle to finish,
        // then releases the backend resources deterministically.
        entry.handle.lock().await.close();
        self.model_unloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Run inference on `key`, auto-loading it if not resident.
    ///
    /// Calls against the same key are serialized by the per-model lock.
    /// Success, failure, and response time are recorded in telemetry
    /// regardless of outcome. A native failure returns `Inference`
    /// without unloading the model; a single bad prompt must not evict
    /// a healthy model. A timeout abandons the wait, not the work: the
    /// call keeps running on a detached task that holds the per-model
    /// lock until it finishes, so the next caller for this key queues
    /// behind it. The abandoned call's eventual result is discarded.
    pub async fn run(&self, key: &str, prompt: &str, params: &GenerationParams) -> Result<String> {
        self.descriptor(key)?;
        if !self.is_resident(key).await {
            self.load(key).await?;
        }

        let handle = {
            let resident = self.resident.read().await;
            match resident.get(key) {
                Some(entry) => Arc::clone(&entry.handle),
                // Evicted between load and fetch by a concurrent
                // caller; surface as a per-call inference error so the
                // fallback chain can retry.
                None => {
                    return Err(Error::Inference {
                        key: key.to_string(),
                        reason: "model was evicted before inference started".to_string(),
                    })
                }
            }
        };

        *self.current.write().await = Some(key.to_string());

        let start = Instant::now();
        let outcome = match params.timeout_ms {
            Some(ms) => {
                // The call runs on a detached task with an owned lock
                // guard, so an expired wait leaves the handle busy
                // until the native call completes on its own.
                let owned_prompt = prompt.to_string();
                let owned_params = params.clone();
                let task = tokio::spawn(async move {
                    let mut guard = handle.lock_owned().await;
                    guard.run(&owned_prompt, &owned_params).await
                });
                match tokio::time::timeout(Duration::from_millis(ms), task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => Err(Error::Inference {
                        key: key.to_string(),
                        reason: format!("inference task failed: {e}"),
                    }),
                    Err(_) => Err(Error::Timeout(ms)),
                }
            }
            None => run_on_handle(&handle, prompt, params).await,
        };
        let elapsed = start.elapsed().as_secs_f64();

        {
            let mut stats = self.stats.write().await;
            let entry = stats.entry(key.to_string()).or_default();
            if outcome.is_ok() {
                entry.success_count += 1;
            } else {
                entry.error_count += 1;
            }
            entry.total_response_time_secs += elapsed;
        }

        if let Err(e) = &outcome {
            warn!("Inference on '{}' failed after {:.2}s: {}", key, elapsed, e);
        }
        outcome
    }

    /// Read-only telemetry snapshot. Fails with `ModelNotFound` for
    /// unconfigured keys; configured-but-never-loaded keys report the
    /// optimistic defaults.
    pub async fn stats(&self, key: &str) -> Result<ModelPerformanceStats> {
        self.descriptor(key)?;
        Ok(self.stats.read().await.get(key).cloned().unwrap_or_default())
    }

    pub async fn all_stats(&self) -> HashMap<String, ModelPerformanceStats> {
        self.stats.read().await.clone()
    }

    /// Operator action: wipe all performance telemetry.
    pub async fn reset_stats(&self) {
        self.stats.write().await.clear();
        info!("Performance telemetry reset");
    }
}

async fn run_on_handle(
    handle: &Arc<Mutex<Box<dyn InferenceHandle>>>,
    prompt: &str,
    params: &GenerationParams,
) -> Result<String> {
    let mut guard = handle.lock().await;
    guard.run(prompt, params).await
}

/// Pick the eviction victim: smallest load count, ties broken by the
/// earliest load time, excluding the currently selected model. When the
/// selected model is the only resident one, it is evicted anyway so the
/// residency bound holds.
fn pick_eviction_victim(
    resident: &HashMap<String, ResidentModel>,
    stats: &HashMap<String, ModelPerformanceStats>,
    current: Option<&str>,
) -> Option<String> {
    let candidates: Vec<&String> = resident
        .keys()
        .filter(|k| Some(k.as_str()) != current)
        .collect();
    let pool: Vec<&String> = if candidates.is_empty() {
        resident.keys().collect()
    } else {
        candidates
    };
    pool.into_iter()
        .min_by_key(|k| {
            let loads = stats.get(*k).map(|s| s.load_count).unwrap_or(0);
            let loaded_at = resident.get(*k).map(|r| r.loaded_at);
            (loads, loaded_at)
        })
        .cloned()
}
