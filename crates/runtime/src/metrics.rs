//! Passive metric recorder.
//!
//! Every component calls into [`MetricsSink`] at fixed points. Recording goes
//! through the `metrics` facade, so with no recorder installed each call is a
//! no-op and a recorder can never fail back into the caller. The server
//! binary installs the Prometheus exporter.

use std::time::Instant;

use metrics::{counter, gauge, histogram};

use mob_ai_core::{Archetype, FallbackLevel, ModelKey, ModelType};

use crate::cache::{CacheStats, CacheTier};
use crate::health::HealthSnapshot;

/// Outcome label for request counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RequestOutcome {
    Success,
    Fallback,
    Error,
}

/// Cloneable handle over the global metrics recorder.
#[derive(Clone, Debug)]
pub struct MetricsSink {
    started: Instant,
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    pub fn record_request(&self, archetype: Archetype, model_type: ModelType, outcome: RequestOutcome) {
        let status: &'static str = outcome.into();
        counter!(
            "mob_ai_requests_total",
            "archetype" => archetype.as_str(),
            "model_type" => model_type.as_str(),
            "status" => status
        )
        .increment(1);
    }

    pub fn record_cache_hit(&self, tier: CacheTier) {
        counter!("mob_ai_cache_hits_total", "tier" => tier.as_str()).increment(1);
    }

    pub fn record_cache_miss(&self, tier: CacheTier) {
        counter!("mob_ai_cache_misses_total", "tier" => tier.as_str()).increment(1);
    }

    pub fn record_fallback_transition(&self, from: FallbackLevel, to: FallbackLevel) {
        counter!(
            "mob_ai_fallback_transitions_total",
            "from" => from.name(),
            "to" => to.name()
        )
        .increment(1);
    }

    pub fn record_inference_error(&self, error_type: &'static str) {
        counter!("mob_ai_inference_errors_total", "type" => error_type).increment(1);
    }

    /// A batch group had no loaded model and was answered with the default.
    pub fn record_missing_model(&self, key: ModelKey) {
        counter!(
            "mob_ai_missing_model_total",
            "archetype" => key.archetype.as_str(),
            "model_type" => key.model_type.as_str()
        )
        .increment(1);
    }

    pub fn record_model_reload(&self, key: ModelKey, success: bool) {
        counter!(
            "mob_ai_model_reloads_total",
            "archetype" => key.archetype.as_str(),
            "model_type" => key.model_type.as_str(),
            "status" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    // ------------------------------------------------------------------
    // Histograms
    // ------------------------------------------------------------------

    pub fn record_inference_latency(
        &self,
        archetype: Archetype,
        model_type: ModelType,
        cache_hit: bool,
        latency_ms: f64,
    ) {
        histogram!(
            "mob_ai_inference_latency_seconds",
            "archetype" => archetype.as_str(),
            "model_type" => model_type.as_str(),
            "cache_status" => if cache_hit { "hit" } else { "miss" }
        )
        .record(latency_ms / 1000.0);
    }

    pub fn record_batch_size(&self, size: usize) {
        histogram!("mob_ai_batch_size").record(size as f64);
    }

    pub fn record_db_query(&self, operation: &'static str, latency_ms: f64) {
        histogram!("mob_ai_db_query_seconds", "operation" => operation).record(latency_ms / 1000.0);
    }

    // ------------------------------------------------------------------
    // Gauges
    // ------------------------------------------------------------------

    pub fn set_fallback_level(&self, level: FallbackLevel) {
        gauge!("mob_ai_fallback_level").set(level.value() as f64);
    }

    pub fn set_model_loaded(&self, key: ModelKey, loaded: bool) {
        gauge!(
            "mob_ai_model_loaded",
            "archetype" => key.archetype.as_str(),
            "model_type" => key.model_type.as_str()
        )
        .set(if loaded { 1.0 } else { 0.0 });
    }

    pub fn set_resource_usage(&self, snapshot: &HealthSnapshot) {
        if let Some(vram) = snapshot.gpu.vram_used_percent {
            gauge!("mob_ai_vram_usage_percent").set(vram as f64);
        }
        gauge!("mob_ai_ram_usage_percent").set(snapshot.ram.used_percent as f64);
        gauge!("mob_ai_cpu_usage_percent").set(snapshot.cpu.usage_percent as f64);
        gauge!("mob_ai_disk_usage_percent").set(snapshot.disk.used_percent as f64);
    }

    pub fn set_db_pool(&self, size: u32, idle: u32) {
        gauge!("mob_ai_db_pool_size").set(size as f64);
        gauge!("mob_ai_db_pool_in_use").set(size.saturating_sub(idle) as f64);
    }

    pub fn set_pending_requests(&self, pending: i64) {
        gauge!("mob_ai_pending_requests").set(pending as f64);
    }

    pub fn set_cache_stats(&self, stats: &CacheStats) {
        gauge!("mob_ai_cache_hit_rate", "tier" => "l2").set(stats.l2_hit_rate);
        gauge!("mob_ai_cache_hit_rate", "tier" => "l3").set(stats.l3_hit_rate);
        gauge!("mob_ai_cache_hit_rate", "tier" => "total").set(stats.total_hit_rate);
    }

    pub fn update_uptime(&self) {
        gauge!("mob_ai_uptime_seconds").set(self.started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::*;

    #[test]
    fn counters_carry_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let sink = MetricsSink::new();

        metrics::with_local_recorder(&recorder, || {
            sink.record_request(Archetype::Mage, ModelType::CombatDqn, RequestOutcome::Success);
            sink.record_request(Archetype::Mage, ModelType::CombatDqn, RequestOutcome::Success);
            sink.record_fallback_transition(FallbackLevel::GpuFp16, FallbackLevel::GpuInt8);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let requests = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "mob_ai_requests_total")
            .expect("request counter recorded");
        assert!(matches!(requests.3, DebugValue::Counter(2)));
        assert!(
            requests
                .0
                .key()
                .labels()
                .any(|label| label.key() == "archetype" && label.value() == "mage")
        );

        let transition = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "mob_ai_fallback_transitions_total")
            .expect("transition counter recorded");
        assert!(
            transition
                .0
                .key()
                .labels()
                .any(|label| label.key() == "to" && label.value() == "GPU_INT8")
        );
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        let sink = MetricsSink::new();
        sink.set_fallback_level(FallbackLevel::TraditionalAi);
        sink.record_batch_size(128);
        sink.update_uptime();
    }
}
