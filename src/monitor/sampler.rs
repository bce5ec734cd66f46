// Host resource sampling for the auto-optimizer.
//
// CPU, memory, and disk come from sysinfo; temperature is read from the
// kernel thermal zone first (single-board devices expose it there) with
// sysinfo's component sensors as a fallback. Platforms without any
// thermal sensor report `None`, which threshold checks must skip:
// a missing signal is neither "safe" nor "critical".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Components, Disks, System};
use tracing::debug;

use crate::error::{Error, Result};

const THERMAL_ZONE_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Immutable point-in-time reading of host resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub temperature_celsius: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot producer. A trait seam so the optimizer loop can be driven
/// by a fixed or scripted sampler in tests.
pub trait ResourceSampler: Send {
    fn sample(&mut self) -> Result<ResourceSnapshot>;
}

/// sysinfo-backed sampler for the real host.
pub struct SystemSampler {
    system: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
        }
    }

    fn read_thermal_zone() -> Option<f32> {
        let raw = std::fs::read_to_string(THERMAL_ZONE_PATH).ok()?;
        let millicelsius: f32 = raw.trim().parse().ok()?;
        Some(millicelsius / 1000.0)
    }

    fn read_component_sensor() -> Option<f32> {
        let components = Components::new_with_refreshed_list();
        components
            .list()
            .first()
            .map(|component| component.temperature())
    }

    fn temperature() -> Option<f32> {
        Self::read_thermal_zone().or_else(Self::read_component_sensor)
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SystemSampler {
    fn sample(&mut self) -> Result<ResourceSnapshot> {
        self.system.refresh_all();

        let cpu_percent = self.system.global_cpu_info().cpu_usage();

        let total_memory = self.system.total_memory();
        if total_memory == 0 {
            return Err(Error::ResourceSample(
                "host reports zero total memory".to_string(),
            ));
        }
        let memory_percent =
            (self.system.used_memory() as f64 / total_memory as f64 * 100.0) as f32;

        let disks = Disks::new_with_refreshed_list();
        let (total_space, available_space) = disks
            .list()
            .iter()
            .fold((0u64, 0u64), |(total, available), disk| {
                (total + disk.total_space(), available + disk.available_space())
            });
        let disk_percent = if total_space > 0 {
            ((total_space - available_space) as f64 / total_space as f64 * 100.0) as f32
        } else {
            0.0
        };

        let temperature_celsius = Self::temperature();
        debug!(
            "Sampled resources: cpu={:.1}% mem={:.1}% disk={:.1}% temp={:?}",
            cpu_percent, memory_percent, disk_percent, temperature_celsius
        );

        Ok(ResourceSnapshot {
            cpu_percent,
            memory_percent,
            disk_percent,
            temperature_celsius,
            timestamp: Utc::now(),
        })
    }
}
