//! Host (RAM, CPU, disk) telemetry.

use std::path::PathBuf;
use std::sync::Mutex;

use sysinfo::{Disks, System};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MemorySample {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemorySample {
    pub fn used_percent(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        (used as f64 / self.total_bytes as f64 * 100.0) as f32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CpuSample {
    pub usage_percent: f32,
    pub cores: usize,
    pub load_one: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DiskSample {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl DiskSample {
    pub fn used_percent(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        (used as f64 / self.total_bytes as f64 * 100.0) as f32
    }
}

/// Source of host telemetry. Calls may block briefly.
pub trait HostProbe: Send + Sync {
    fn memory(&self) -> MemorySample;
    fn cpu(&self) -> CpuSample;
    fn disk(&self) -> DiskSample;
}

/// [`HostProbe`] over `sysinfo`.
///
/// CPU usage is a delta between refreshes, so the first reading after
/// construction is 0.
pub struct SysinfoProbe {
    system: Mutex<System>,
    disk_path: PathBuf,
}

impl SysinfoProbe {
    /// Disk usage is reported for the mount holding `disk_path`.
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
            disk_path: disk_path.into(),
        }
    }
}

impl HostProbe for SysinfoProbe {
    fn memory(&self) -> MemorySample {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_memory();
        MemorySample {
            total_bytes: system.total_memory(),
            available_bytes: system.available_memory(),
        }
    }

    fn cpu(&self) -> CpuSample {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_cpu_usage();
        let cpus = system.cpus();
        let cores = cpus.len();
        let usage_percent = if cores == 0 {
            0.0
        } else {
            cpus.iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / cores as f32
        };
        CpuSample {
            usage_percent,
            cores,
            load_one: System::load_average().one,
        }
    }

    fn disk(&self) -> DiskSample {
        let path = std::fs::canonicalize(&self.disk_path).unwrap_or_else(|_| self.disk_path.clone());
        let disks = Disks::new_with_refreshed_list();
        // Longest mount point that prefixes the path wins.
        disks
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| DiskSample {
                total_bytes: disk.total_space(),
                available_bytes: disk.available_space(),
            })
            .unwrap_or_default()
    }
}

/// Fixed readings for tests.
#[derive(Debug, Default)]
pub struct StaticHostProbe {
    pub memory: Mutex<MemorySample>,
    pub cpu: Mutex<CpuSample>,
    pub disk: Mutex<DiskSample>,
}

impl StaticHostProbe {
    /// A host at the given RAM, CPU and disk utilization percentages.
    pub fn at(ram_percent: f32, cpu_percent: f32, disk_percent: f32) -> Self {
        let probe = Self::default();
        probe.set(ram_percent, cpu_percent, disk_percent);
        probe
    }

    pub fn set(&self, ram_percent: f32, cpu_percent: f32, disk_percent: f32) {
        const TOTAL: u64 = 100_000;
        let available = |pct: f32| TOTAL - (TOTAL as f32 * pct / 100.0) as u64;
        *self.memory.lock().unwrap_or_else(|e| e.into_inner()) = MemorySample {
            total_bytes: TOTAL,
            available_bytes: available(ram_percent),
        };
        *self.cpu.lock().unwrap_or_else(|e| e.into_inner()) = CpuSample {
            usage_percent: cpu_percent,
            cores: 8,
            load_one: 0.0,
        };
        *self.disk.lock().unwrap_or_else(|e| e.into_inner()) = DiskSample {
            total_bytes: TOTAL,
            available_bytes: available(disk_percent),
        };
    }
}

impl HostProbe for StaticHostProbe {
    fn memory(&self) -> MemorySample {
        *self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cpu(&self) -> CpuSample {
        *self.cpu.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn disk(&self) -> DiskSample {
        *self.disk.lock().unwrap_or_else(|e| e.into_inner())
    }
}
