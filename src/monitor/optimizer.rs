// ARCHITECTURE: Resource Thresholds & Auto-Optimizer
//
// The optimizer runs on its own schedule, compares each resource
// snapshot against configured thresholds, and feeds back into the
// rest of the runtime: critical temperature unloads the currently
// selected model (thermal damage is the least reversible risk, so it
// is prioritized over CPU/memory actions), critical memory sweeps the
// cache and reclaims slack allocations, and every warning or critical
// metric emits a structured alert record. A monitoring failure is
// logged and skipped; it must never crash request-serving paths.
//
// Status is recomputed fresh on every tick from the latest snapshot:
// no hysteresis, a transient spike can flip the level and immediately
// flip back.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::error::{Error, Result};
use crate::models::ModelRegistry;
use crate::monitor::sampler::{ResourceSampler, ResourceSnapshot};

/// Fraction of a critical threshold at which a metric enters the
/// warning band. Derived, never configured separately.
pub const WARNING_FRACTION: f32 = 0.8;

const HISTORY_CAPACITY: usize = 100;

/// Critical upper bounds for each monitored metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub temperature_celsius: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 90.0,
            memory_percent: 90.0,
            disk_percent: 90.0,
            temperature_celsius: 75.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cpu,
    Memory,
    Disk,
    Temperature,
}

impl Metric {
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::Disk => "disk",
            Metric::Temperature => "temperature",
        }
    }
}

/// Structured alert record emitted for every metric in warning or
/// critical state.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub metric: Metric,
    pub level: StatusLevel,
    pub value: f32,
    pub threshold: f32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("cpu_percent", self.cpu_percent),
            ("memory_percent", self.memory_percent),
            ("disk_percent", self.disk_percent),
            ("temperature_celsius", self.temperature_celsius),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::Config(format!(
                    "threshold {name} must be a positive number, got {value}"
                )));
            }
        }
        Ok(())
    }

    fn metric_level(value: f32, threshold: f32) -> StatusLevel {
        if value >= threshold {
            StatusLevel::Critical
        } else if value >= threshold * WARNING_FRACTION {
            StatusLevel::Warning
        } else {
            StatusLevel::Normal
        }
    }

    fn metric_levels(&self, snapshot: &ResourceSnapshot) -> Vec<(Metric, f32, f32, StatusLevel)> {
        let mut levels = vec![
            (
                Metric::Cpu,
                snapshot.cpu_percent,
                self.cpu_percent,
                Self::metric_level(snapshot.cpu_percent, self.cpu_percent),
            ),
            (
                Metric::Memory,
                snapshot.memory_percent,
                self.memory_percent,
                Self::metric_level(snapshot.memory_percent, self.memory_percent),
            ),
            (
                Metric::Disk,
                snapshot.disk_percent,
                self.disk_percent,
                Self::metric_level(snapshot.disk_percent, self.disk_percent),
            ),
        ];
        // An absent thermal signal is simply not evaluated.
        if let Some(temperature) = snapshot.temperature_celsius {
            levels.push((
                Metric::Temperature,
                temperature,
                self.temperature_celsius,
                Self::metric_level(temperature, self.temperature_celsius),
            ));
        }
        levels
    }

    /// Overall status: critical if any metric is critical, else warning
    /// if any metric is in the warning band, else normal.
    pub fn status_of(&self, snapshot: &ResourceSnapshot) -> StatusLevel {
        self.metric_levels(snapshot)
            .into_iter()
            .map(|(_, _, _, level)| level)
            .max()
            .unwrap_or(StatusLevel::Normal)
    }

    pub fn level_of(&self, snapshot: &ResourceSnapshot, metric: Metric) -> StatusLevel {
        self.metric_levels(snapshot)
            .into_iter()
            .find(|(m, _, _, _)| *m == metric)
            .map(|(_, _, _, level)| level)
            .unwrap_or(StatusLevel::Normal)
    }

    pub fn alerts_for(&self, snapshot: &ResourceSnapshot) -> Vec<Alert> {
        self.metric_levels(snapshot)
            .into_iter()
            .filter(|(_, _, _, level)| *level != StatusLevel::Normal)
            .map(|(metric, value, threshold, level)| Alert {
                id: Uuid::new_v4(),
                metric,
                level,
                value,
                threshold,
                message: format!(
                    "High {} usage: {:.1} (threshold: {:.1})",
                    metric.label(),
                    value,
                    threshold
                ),
                timestamp: snapshot.timestamp,
            })
            .collect()
    }
}

pub type SampleHook = Box<dyn Fn(&ResourceSnapshot, StatusLevel) + Send + Sync>;
pub type AlertHook = Box<dyn Fn(&Alert) + Send + Sync>;
pub type ThrottleHook = Box<dyn Fn(Metric, f32, f32) + Send + Sync>;

/// Optional observer callbacks invoked on every optimizer tick, letting
/// external logging / GUI / audit components watch state changes
/// without the runtime depending on them.
#[derive(Default)]
pub struct MonitorHooks {
    pub on_sample: Option<SampleHook>,
    pub on_alert: Option<AlertHook>,
    pub on_throttle: Option<ThrottleHook>,
}

/// Averages over the recent snapshot history ring.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceAverages {
    pub readings: usize,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub temperature_celsius: Option<f32>,
}

pub struct AutoOptimizer {
    registry: Arc<ModelRegistry>,
    cache: Arc<ResponseCache>,
    thresholds: Thresholds,
    interval: Duration,
    hooks: Arc<MonitorHooks>,
    history: Arc<Mutex<VecDeque<ResourceSnapshot>>>,
    memory_cleanups: Arc<AtomicU64>,
    task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl AutoOptimizer {
    pub fn new(
        registry: Arc<ModelRegistry>,
        cache: Arc<ResponseCache>,
        thresholds: Thresholds,
        interval: Duration,
        hooks: MonitorHooks,
    ) -> Self {
        Self {
            registry,
            cache,
            thresholds,
            interval,
            hooks: Arc::new(hooks),
            history: Arc::new(Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY))),
            memory_cleanups: Arc::new(AtomicU64::new(0)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn memory_cleanups(&self) -> u64 {
        self.memory_cleanups.load(Ordering::Relaxed)
    }

    /// Start the background tick loop. The sampler is owned by the
    /// loop; a failed sample skips that tick's optimization pass and
    /// the loop continues on its next tick.
    pub async fn start<S>(&self, mut sampler: S)
    where
        S: ResourceSampler + 'static,
    {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("Auto-optimizer already running");
            return;
        }

        let optimizer = self.clone();
        let interval = self.interval;
        info!(
            "Auto-optimizer started (interval: {}s)",
            interval.as_secs_f64()
        );
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match sampler.sample() {
                    Ok(snapshot) => {
                        optimizer.apply_snapshot(snapshot).await;
                    }
                    Err(e) => {
                        error!("Resource sample failed, skipping tick: {}", e);
                    }
                }
            }
        }));
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            info!("Auto-optimizer stopped");
        }
    }

    /// Evaluate one snapshot and apply optimization actions. Public so
    /// the decision path can be driven directly with synthetic
    /// snapshots; the background loop calls this with live samples.
    /// Never returns an error: every failure is logged and absorbed.
    pub async fn apply_snapshot(&self, snapshot: ResourceSnapshot) -> StatusLevel {
        {
            let mut history = self.history.lock().await;
            if history.len() >= HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(snapshot.clone());
        }

        let status = self.thresholds.status_of(&snapshot);
        let alerts = self.thresholds.alerts_for(&snapshot);

        // Thermal throttling first: unload the currently selected model
        // to shed the largest single memory consumer and heat source.
        if let Some(temperature) = snapshot.temperature_celsius {
            if self.thresholds.level_of(&snapshot, Metric::Temperature) == StatusLevel::Critical {
                warn!(
                    "Critical temperature {:.1}°C, unloading current model",
                    temperature
                );
                if let Some(current) = self.registry.current_model().await {
                    if let Err(e) = self.registry.unload(&current).await {
                        error!("Thermal unload of '{}' failed: {}", current, e);
                    }
                }
                self.throttle(Metric::Temperature, temperature, self.thresholds.temperature_celsius);
            }
        }

        // Opportunistic expired-entry sweep runs on every tick to keep
        // memory bounded between lookups.
        let swept = self.cache.cleanup_expired().await;

        if self.thresholds.level_of(&snapshot, Metric::Memory) == StatusLevel::Critical {
            warn!(
                "Critical memory usage {:.1}%, reclaiming (swept {} expired entries)",
                snapshot.memory_percent, swept
            );
            self.cache.shrink().await;
            self.memory_cleanups.fetch_add(1, Ordering::Relaxed);
            self.throttle(Metric::Memory, snapshot.memory_percent, self.thresholds.memory_percent);
        }

        if self.thresholds.level_of(&snapshot, Metric::Cpu) == StatusLevel::Critical {
            self.throttle(Metric::Cpu, snapshot.cpu_percent, self.thresholds.cpu_percent);
        }

        for alert in &alerts {
            warn!("{}", alert.message);
            if let Some(on_alert) = &self.hooks.on_alert {
                on_alert(alert);
            }
        }
        if let Some(on_sample) = &self.hooks.on_sample {
            on_sample(&snapshot, status);
        }

        status
    }

    fn throttle(&self, metric: Metric, value: f32, threshold: f32) {
        if let Some(on_throttle) = &self.hooks.on_throttle {
            on_throttle(metric, value, threshold);
        }
    }

    pub async fn recent_history(&self, limit: usize) -> Vec<ResourceSnapshot> {
        let history = self.history.lock().await;
        history
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// Average resource usage over roughly the last `minutes` of
    /// history, assuming snapshots were taken at the configured
    /// interval.
    pub async fn average_stats(&self, minutes: u64) -> Option<ResourceAverages> {
        let history = self.history.lock().await;
        if history.is_empty() {
            return None;
        }
        let per_minute = (60.0 / self.interval.as_secs_f64().max(1.0)).max(1.0);
        let count = ((minutes as f64 * per_minute) as usize)
            .clamp(1, history.len());
        let recent: Vec<&ResourceSnapshot> = history.iter().rev().take(count).collect();
        let n = recent.len() as f32;
        let temps: Vec<f32> = recent
            .iter()
            .filter_map(|s| s.temperature_celsius)
            .collect();
        Some(ResourceAverages {
            readings: recent.len(),
            cpu_percent: recent.iter().map(|s| s.cpu_percent).sum::<f32>() / n,
            memory_percent: recent.iter().map(|s| s.memory_percent).sum::<f32>() / n,
            disk_percent: recent.iter().map(|s| s.disk_percent).sum::<f32>() / n,
            temperature_celsius: if temps.is_empty() {
                None
            } else {
                Some(temps.iter().sum::<f32>() / temps.len() as f32)
            },
        })
    }
}

// The background task needs its own handle slot; shared state stays shared.
impl Clone for AutoOptimizer {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            thresholds: self.thresholds,
            interval: self.interval,
            hooks: Arc::clone(&self.hooks),
            history: Arc::clone(&self.history),
            memory_cleanups: Arc::clone(&self.memory_cleanups),
            task: Arc::clone(&self.task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu: f32, memory: f32, disk: f32, temperature: Option<f32>) -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_percent: cpu,
            memory_percent: memory,
            disk_percent: disk,
            temperature_celsius: temperature,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn status_levels_follow_thresholds() {
        let thresholds = Thresholds {
            temperature_celsius: 75.0,
            ..Thresholds::default()
        };
        assert_eq!(
            thresholds.status_of(&snapshot(10.0, 10.0, 10.0, Some(76.0))),
            StatusLevel::Critical
        );
        assert_eq!(
            thresholds.status_of(&snapshot(10.0, 10.0, 10.0, Some(61.0))),
            StatusLevel::Warning
        );
        assert_eq!(
            thresholds.status_of(&snapshot(10.0, 10.0, 10.0, Some(50.0))),
            StatusLevel::Normal
        );
    }

    #[test]
    fn missing_temperature_is_not_evaluated() {
        let thresholds = Thresholds::default();
        assert_eq!(
            thresholds.status_of(&snapshot(10.0, 10.0, 10.0, None)),
            StatusLevel::Normal
        );
        assert!(thresholds.alerts_for(&snapshot(10.0, 10.0, 10.0, None)).is_empty());
    }

    #[test]
    fn alert_emitted_per_offending_metric() {
        let thresholds = Thresholds::default();
        let alerts = thresholds.alerts_for(&snapshot(95.0, 85.0, 10.0, Some(80.0)));
        assert_eq!(alerts.len(), 3);
        let critical: Vec<_> = alerts
            .iter()
            .filter(|a| a.level == StatusLevel::Critical)
            .map(|a| a.metric)
            .collect();
        assert!(critical.contains(&Metric::Cpu));
        assert!(critical.contains(&Metric::Temperature));
        assert_eq!(
            thresholds.level_of(&snapshot(95.0, 85.0, 10.0, Some(80.0)), Metric::Memory),
            StatusLevel::Warning
        );
    }

    #[test]
    fn boundary_value_is_critical() {
        assert_eq!(
            Thresholds::metric_level(90.0, 90.0),
            StatusLevel::Critical
        );
        assert_eq!(
            Thresholds::metric_level(72.0, 90.0),
            StatusLevel::Warning
        );
        assert_eq!(
            Thresholds::metric_level(71.9, 90.0),
            StatusLevel::Normal
        );
    }
}
