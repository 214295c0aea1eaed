//! System health sensor.
//!
//! [`HealthMonitor`] samples GPU, RAM, CPU and disk and classifies each into
//! a [`HealthStatus`]. It never changes service behaviour; the fallback
//! controller and the metrics sink consume its snapshots.

#[cfg(feature = "cuda")]
mod device;
mod gpu;
mod host;

pub use gpu::{GpuProbe, GpuSample, NvidiaSmiProbe, StaticGpuProbe};
pub use host::{CpuSample, DiskSample, HostProbe, MemorySample, StaticHostProbe, SysinfoProbe};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

/// Tri-state component status. Ordered so the worst status is the maximum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
}

/// Warning/critical cut-offs in percent utilization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub warning: f32,
    pub critical: f32,
}

impl Thresholds {
    pub const fn new(warning: f32, critical: f32) -> Self {
        Self { warning, critical }
    }

    pub fn classify(&self, percent: f32) -> HealthStatus {
        if percent >= self.critical {
            HealthStatus::Critical
        } else if percent >= self.warning {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HealthThresholds {
    pub vram: Thresholds,
    pub ram: Thresholds,
    pub cpu: Thresholds,
    pub disk: Thresholds,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            vram: Thresholds::new(85.0, 95.0),
            ram: Thresholds::new(80.0, 90.0),
            cpu: Thresholds::new(80.0, 95.0),
            disk: Thresholds::new(85.0, 95.0),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GpuHealth {
    pub status: HealthStatus,
    pub available: bool,
    /// Whether the synthetic device operation completed.
    pub functional: bool,
    pub vram_used_percent: Option<f32>,
    pub vram_free_mb: Option<f32>,
    pub utilization_percent: Option<f32>,
    pub temperature_c: Option<f32>,
    /// VRAM crossed the critical threshold.
    pub oom_risk: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RamHealth {
    pub status: HealthStatus,
    pub used_percent: f32,
    pub available_mb: f32,
    pub total_mb: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CpuHealth {
    pub status: HealthStatus,
    pub usage_percent: f32,
    pub cores: usize,
    pub load_one: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DiskHealth {
    pub status: HealthStatus,
    pub used_percent: f32,
    pub free_gb: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub overall: HealthStatus,
    pub gpu: GpuHealth,
    pub ram: RamHealth,
    pub cpu: CpuHealth,
    pub disk: DiskHealth,
}

const MB: f32 = 1024.0 * 1024.0;
const GB: f32 = MB * 1024.0;

/// Default number of snapshots kept in history.
pub const HISTORY_LEN: usize = 100;

pub struct HealthMonitor {
    gpu: Arc<dyn GpuProbe>,
    host: Arc<dyn HostProbe>,
    thresholds: HealthThresholds,
    oom_alerted: AtomicBool,
    history: Mutex<VecDeque<HealthSnapshot>>,
    history_len: usize,
}

impl HealthMonitor {
    pub fn new(gpu: Arc<dyn GpuProbe>, host: Arc<dyn HostProbe>) -> Self {
        Self {
            gpu,
            host,
            thresholds: HealthThresholds::default(),
            oom_alerted: AtomicBool::new(false),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LEN)),
            history_len: HISTORY_LEN,
        }
    }

    /// Monitor over `nvidia-smi` and `sysinfo`, reporting disk usage for the
    /// mount holding `disk_path`.
    pub fn system(disk_path: impl Into<std::path::PathBuf>) -> Self {
        Self::new(
            Arc::new(NvidiaSmiProbe),
            Arc::new(SysinfoProbe::new(disk_path)),
        )
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_history_len(mut self, len: usize) -> Self {
        self.history_len = len.max(1);
        self
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    pub fn check_gpu(&self) -> GpuHealth {
        let Some(sample) = self.gpu.sample() else {
            return GpuHealth {
                status: HealthStatus::Critical,
                ..GpuHealth::default()
            };
        };

        let vram = sample.vram_used_percent();
        let functional = self.gpu.functional_check();
        let mut status = self.thresholds.vram.classify(vram);
        if !functional {
            status = HealthStatus::Critical;
        }

        let oom_risk = vram >= self.thresholds.vram.critical;
        if oom_risk {
            if !self.oom_alerted.swap(true, Ordering::Relaxed) {
                error!(
                    target: "mob_ai::health",
                    vram_used_percent = vram,
                    threshold = self.thresholds.vram.critical,
                    "GPU OOM risk"
                );
            }
        } else if vram < self.thresholds.vram.warning {
            // Re-arm once pressure is clearly gone.
            self.oom_alerted.store(false, Ordering::Relaxed);
        }

        GpuHealth {
            status,
            available: true,
            functional,
            vram_used_percent: Some(vram),
            vram_free_mb: Some((sample.memory_total_mb - sample.memory_used_mb).max(0.0)),
            utilization_percent: Some(sample.utilization_percent),
            temperature_c: sample.temperature_c,
            oom_risk,
        }
    }

    pub fn check_ram(&self) -> RamHealth {
        let sample = self.host.memory();
        let used_percent = sample.used_percent();
        RamHealth {
            status: self.thresholds.ram.classify(used_percent),
            used_percent,
            available_mb: sample.available_bytes as f32 / MB,
            total_mb: sample.total_bytes as f32 / MB,
        }
    }

    pub fn check_cpu(&self) -> CpuHealth {
        let sample = self.host.cpu();
        CpuHealth {
            status: self.thresholds.cpu.classify(sample.usage_percent),
            usage_percent: sample.usage_percent,
            cores: sample.cores,
            load_one: sample.load_one,
        }
    }

    pub fn check_disk(&self) -> DiskHealth {
        let sample = self.host.disk();
        let used_percent = sample.used_percent();
        DiskHealth {
            status: self.thresholds.disk.classify(used_percent),
            used_percent,
            free_gb: sample.available_bytes as f32 / GB,
        }
    }

    /// Samples every component, records the snapshot in history and returns
    /// it. Blocking; call from `spawn_blocking` on async paths.
    pub fn full_health_check(&self) -> HealthSnapshot {
        let gpu = self.check_gpu();
        let ram = self.check_ram();
        let cpu = self.check_cpu();
        let disk = self.check_disk();

        // A host without a GPU is a valid CPU deployment, not a critical one.
        let gpu_status = if gpu.available {
            gpu.status
        } else {
            HealthStatus::Healthy
        };
        let overall = gpu_status.max(ram.status).max(cpu.status).max(disk.status);
        if overall == HealthStatus::Critical {
            warn!(
                target: "mob_ai::health",
                gpu = ?gpu.status,
                ram = ?ram.status,
                cpu = ?cpu.status,
                disk = ?disk.status,
                "system health critical"
            );
        }

        let snapshot = HealthSnapshot {
            timestamp: Utc::now(),
            overall,
            gpu,
            ram,
            cpu,
            disk,
        };

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() == self.history_len {
            history.pop_front();
        }
        history.push_back(snapshot.clone());
        snapshot
    }

    /// Most recent snapshots, oldest first.
    pub fn history(&self) -> Vec<HealthSnapshot> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu_at(used_mb: f32) -> GpuSample {
        GpuSample {
            memory_used_mb: used_mb,
            memory_total_mb: 100.0,
            utilization_percent: 50.0,
            temperature_c: Some(60.0),
        }
    }

    #[test]
    fn overall_is_worst_component() {
        let gpu = Arc::new(StaticGpuProbe::with_sample(gpu_at(10.0), true));
        let host = Arc::new(StaticHostProbe::at(50.0, 96.0, 10.0));
        let monitor = HealthMonitor::new(gpu, host);

        let snapshot = monitor.full_health_check();
        assert_eq!(snapshot.cpu.status, HealthStatus::Critical);
        assert_eq!(snapshot.ram.status, HealthStatus::Healthy);
        assert_eq!(snapshot.overall, HealthStatus::Critical);
    }

    #[test]
    fn missing_gpu_does_not_make_host_critical() {
        let monitor = HealthMonitor::new(
            Arc::new(StaticGpuProbe::absent()),
            Arc::new(StaticHostProbe::at(10.0, 10.0, 10.0)),
        );
        let snapshot = monitor.full_health_check();
        assert!(!snapshot.gpu.available);
        assert_eq!(snapshot.overall, HealthStatus::Healthy);
    }

    #[test]
    fn non_functional_gpu_is_critical() {
        let monitor = HealthMonitor::new(
            Arc::new(StaticGpuProbe::with_sample(gpu_at(10.0), false)),
            Arc::new(StaticHostProbe::at(10.0, 10.0, 10.0)),
        );
        let gpu = monitor.check_gpu();
        assert!(gpu.available);
        assert!(!gpu.functional);
        assert_eq!(gpu.status, HealthStatus::Critical);
    }

    #[test]
    fn oom_alert_is_latched_until_pressure_clears() {
        let probe = Arc::new(StaticGpuProbe::with_sample(gpu_at(96.0), true));
        let monitor = HealthMonitor::new(probe.clone(), Arc::new(StaticHostProbe::default()));

        assert!(monitor.check_gpu().oom_risk);
        assert!(monitor.oom_alerted.load(Ordering::Relaxed));
        assert!(monitor.check_gpu().oom_risk);

        probe.set_sample(Some(gpu_at(90.0)));
        monitor.check_gpu();
        assert!(monitor.oom_alerted.load(Ordering::Relaxed), "still above warning");

        probe.set_sample(Some(gpu_at(20.0)));
        monitor.check_gpu();
        assert!(!monitor.oom_alerted.load(Ordering::Relaxed));
    }

    #[test]
    fn history_is_bounded() {
        let monitor = HealthMonitor::new(
            Arc::new(StaticGpuProbe::absent()),
            Arc::new(StaticHostProbe::default()),
        )
        .with_history_len(3);
        for _ in 0..5 {
            monitor.full_health_check();
        }
        assert_eq!(monitor.history().len(), 3);
        assert!(monitor.latest().is_some());
    }
}
