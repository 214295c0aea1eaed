//! Degradation levels and the execution device each one implies.

use std::fmt;

/// Ordered degradation level, best (1) to worst (5).
///
/// Ordering follows the numeric value, so `a < b` means `a` is the better
/// (less degraded) level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FallbackLevel {
    /// Nominal GPU FP16 inference
    GpuFp16 = 1,
    /// Quantized GPU inference under VRAM pressure
    GpuInt8 = 2,
    /// Multi-threaded CPU inference after GPU failure
    CpuInt8 = 3,
    /// Deterministic rule table, no model inference
    RuleBasedMl = 4,
    /// Defer to the game server's built-in AI
    TraditionalAi = 5,
}

impl FallbackLevel {
    pub const BEST: FallbackLevel = FallbackLevel::GpuFp16;
    pub const WORST: FallbackLevel = FallbackLevel::TraditionalAi;

    pub const fn value(self) -> u8 {
        self as u8
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(FallbackLevel::GpuFp16),
            2 => Some(FallbackLevel::GpuInt8),
            3 => Some(FallbackLevel::CpuInt8),
            4 => Some(FallbackLevel::RuleBasedMl),
            5 => Some(FallbackLevel::TraditionalAi),
            _ => None,
        }
    }

    /// One step worse, or `None` at the worst level.
    pub fn worse(self) -> Option<Self> {
        Self::from_value(self.value() + 1)
    }

    /// One step better, or `None` at the best level.
    pub fn better(self) -> Option<Self> {
        self.value().checked_sub(1).and_then(Self::from_value)
    }

    /// True at levels where no model is invoked.
    pub fn skips_model_inference(self) -> bool {
        matches!(
            self,
            FallbackLevel::RuleBasedMl | FallbackLevel::TraditionalAi
        )
    }

    pub fn device_preference(self) -> DevicePreference {
        match self {
            FallbackLevel::GpuFp16 => DevicePreference::GpuFp16,
            FallbackLevel::GpuInt8 => DevicePreference::GpuInt8,
            FallbackLevel::CpuInt8 => DevicePreference::CpuInt8,
            FallbackLevel::RuleBasedMl | FallbackLevel::TraditionalAi => DevicePreference::None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FallbackLevel::GpuFp16 => "GPU_FP16",
            FallbackLevel::GpuInt8 => "GPU_INT8",
            FallbackLevel::CpuInt8 => "CPU_INT8",
            FallbackLevel::RuleBasedMl => "RULE_BASED_ML",
            FallbackLevel::TraditionalAi => "TRADITIONAL_AI",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            FallbackLevel::GpuFp16 => "GPU FP16 (Nominal)",
            FallbackLevel::GpuInt8 => "GPU INT8 (Quantized)",
            FallbackLevel::CpuInt8 => "CPU INT8 (Multi-threaded)",
            FallbackLevel::RuleBasedMl => "Rule-Based ML (Simplified)",
            FallbackLevel::TraditionalAi => "Traditional AI (Fallback)",
        }
    }

    pub fn all() -> impl Iterator<Item = FallbackLevel> {
        <FallbackLevel as strum::IntoEnumIterator>::iter()
    }
}

impl Default for FallbackLevel {
    fn default() -> Self {
        Self::BEST
    }
}

impl fmt::Display for FallbackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Execution device and precision implied by a fallback level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum DevicePreference {
    GpuFp16,
    GpuInt8,
    CpuInt8,
    /// Skip model inference entirely
    None,
}

impl DevicePreference {
    pub fn uses_gpu(self) -> bool {
        matches!(self, DevicePreference::GpuFp16 | DevicePreference::GpuInt8)
    }
}
