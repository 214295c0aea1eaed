//! GPU telemetry probes.

use std::process::Command;
use std::sync::Mutex;

use tracing::debug;

/// Raw GPU reading.
#[derive(Clone, Debug, PartialEq)]
pub struct GpuSample {
    pub memory_used_mb: f32,
    pub memory_total_mb: f32,
    pub utilization_percent: f32,
    pub temperature_c: Option<f32>,
}

impl GpuSample {
    pub fn vram_used_percent(&self) -> f32 {
        if self.memory_total_mb <= 0.0 {
            0.0
        } else {
            self.memory_used_mb / self.memory_total_mb * 100.0
        }
    }
}

/// Source of GPU telemetry.
///
/// `sample` returning `None` means no usable device is present.
pub trait GpuProbe: Send + Sync {
    fn sample(&self) -> Option<GpuSample>;

    /// Runs a small synthetic operation on the device and reports whether it
    /// completed.
    fn functional_check(&self) -> bool;
}

/// Queries the first device through `nvidia-smi`.
///
/// The functional check executes a small graph on the CUDA provider, so it
/// needs the `cuda` feature; without it the device is never reported usable.
#[derive(Debug, Default)]
pub struct NvidiaSmiProbe;

const QUERY_FIELDS: &str = "memory.used,memory.total,utilization.gpu,temperature.gpu";

impl NvidiaSmiProbe {
    fn query(fields: &str) -> Option<String> {
        let output = Command::new("nvidia-smi")
            .arg(format!("--query-gpu={fields}"))
            .arg("--format=csv,noheader,nounits")
            .output()
            .ok()?;
        if !output.status.success() {
            debug!(target: "mob_ai::health", status = %output.status, "nvidia-smi query failed");
            return None;
        }
        let text = String::from_utf8(output.stdout).ok()?;
        text.lines().next().map(str::to_owned)
    }
}

pub(crate) fn parse_sample(line: &str) -> Option<GpuSample> {
    let mut fields = line.split(',').map(str::trim);
    let memory_used_mb = fields.next()?.parse().ok()?;
    let memory_total_mb = fields.next()?.parse().ok()?;
    let utilization_percent = fields.next()?.parse().ok()?;
    let temperature_c = fields.next().and_then(|t| t.parse().ok());
    Some(GpuSample {
        memory_used_mb,
        memory_total_mb,
        utilization_percent,
        temperature_c,
    })
}

impl GpuProbe for NvidiaSmiProbe {
    fn sample(&self) -> Option<GpuSample> {
        Self::query(QUERY_FIELDS).as_deref().and_then(parse_sample)
    }

    #[cfg(feature = "cuda")]
    fn functional_check(&self) -> bool {
        super::device::cuda_functional()
    }

    #[cfg(not(feature = "cuda"))]
    fn functional_check(&self) -> bool {
        debug!(target: "mob_ai::health", "built without cuda, GPU unusable for inference");
        false
    }
}

/// Fixed answers, for hosts without a GPU and for tests.
#[derive(Debug, Default)]
pub struct StaticGpuProbe {
    sample: Mutex<Option<GpuSample>>,
    functional: Mutex<bool>,
}

impl StaticGpuProbe {
    /// A probe that always reports no device.
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn with_sample(sample: GpuSample, functional: bool) -> Self {
        Self {
            sample: Mutex::new(Some(sample)),
            functional: Mutex::new(functional),
        }
    }

    pub fn set_sample(&self, sample: Option<GpuSample>) {
        *self.sample.lock().unwrap_or_else(|e| e.into_inner()) = sample;
    }

    pub fn set_functional(&self, functional: bool) {
        *self.functional.lock().unwrap_or_else(|e| e.into_inner()) = functional;
    }
}

impl GpuProbe for StaticGpuProbe {
    fn sample(&self) -> Option<GpuSample> {
        self.sample.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn functional_check(&self) -> bool {
        *self.functional.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nvidia_smi_csv() {
        let sample = parse_sample("7000, 8000, 55, 63").unwrap();
        assert_eq!(sample.memory_used_mb, 7000.0);
        assert_eq!(sample.temperature_c, Some(63.0));
        assert!((sample.vram_used_percent() - 87.5).abs() < 1e-4);

        let no_temp = parse_sample("100, 8000, 1, [N/A]").unwrap();
        assert_eq!(no_temp.temperature_c, None);
        assert!(parse_sample("garbage").is_none());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn without_cuda_the_device_is_never_functional() {
        assert!(!NvidiaSmiProbe.functional_check());
    }
}
