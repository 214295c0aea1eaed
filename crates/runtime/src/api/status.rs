//! Aggregated status reports returned through the handle.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::engine::{EngineHealth, EngineHealthStatus, EngineStatistics};
use crate::fallback::FallbackStatistics;
use crate::health::{HealthSnapshot, HealthStatus};
use crate::processor::{ProcessorHealth, ProcessorStats};
use crate::workers::WorkerStats;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceStatistics {
    pub uptime_secs: u64,
    pub workers: WorkerStats,
    pub processor: ProcessorStats,
    pub engine: EngineStatistics,
    pub fallback: FallbackStatistics,
    pub cache: CacheStats,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub fallback_level: u8,
    pub engine: EngineHealth,
    pub processor: ProcessorHealth,
    pub cache_connected: bool,
    /// Latest system snapshot, if a health tick has run.
    pub system: Option<HealthSnapshot>,
}

impl ServiceHealth {
    /// Worst of the component statuses.
    pub(crate) fn overall(
        engine: &EngineHealth,
        processor: &ProcessorHealth,
        cache_connected: bool,
        system: Option<&HealthSnapshot>,
    ) -> HealthStatus {
        let engine = match engine.status {
            EngineHealthStatus::Healthy => HealthStatus::Healthy,
            EngineHealthStatus::Degraded => HealthStatus::Warning,
            EngineHealthStatus::Critical => HealthStatus::Critical,
        };
        let cache = if cache_connected {
            HealthStatus::Healthy
        } else {
            HealthStatus::Warning
        };
        [
            engine,
            processor.status,
            cache,
            system.map_or(HealthStatus::Healthy, |s| s.overall),
        ]
        .into_iter()
        .max()
        .unwrap_or_default()
    }
}
