//! Five-level degradation state machine.
//!
//! The controller owns the current [`FallbackLevel`] and moves it in two
//! directions:
//!
//! - **Escalation** (worse): after `max_consecutive_errors` errors in a row,
//!   when a single latency sample exceeds 1.5× the current level's ceiling,
//!   or when a health snapshot shows the current device can no longer serve.
//! - **Recovery** (better): at most once per `recovery_interval`, one level at
//!   a time, and only when the rolling windows meet the target level's
//!   [`RecoveryCriteria`].
//!
//! The engine only reports outcomes; it never sets the level directly.

mod rules;

pub use rules::{RuleFeatures, features, rule_based_action};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use mob_ai_core::{ActionId, DevicePreference, FallbackLevel};

use crate::health::{HealthSnapshot, HealthStatus};
use crate::metrics::MetricsSink;
use crate::stats::RollingWindow;

/// Admission bounds for recovering *into* a level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecoveryCriteria {
    pub max_avg_latency_ms: f64,
    pub max_p95_latency_ms: Option<f64>,
    pub max_error_rate: f64,
    pub requires_gpu: bool,
}

impl RecoveryCriteria {
    fn admits(&self, avg: f64, p95: f64, error_rate: f64, gpu_functional: bool) -> bool {
        (!self.requires_gpu || gpu_functional)
            && avg < self.max_avg_latency_ms
            && self.max_p95_latency_ms.is_none_or(|bound| p95 < bound)
            && error_rate < self.max_error_rate
    }
}

#[derive(Clone, Debug)]
pub struct FallbackConfig {
    /// When false, escalation requests are logged and ignored.
    pub enabled: bool,
    pub auto_recovery: bool,
    pub max_consecutive_errors: u32,
    pub recovery_interval: Duration,
    pub window_size: usize,
    /// Samples required in both windows before recovery is considered.
    pub min_recovery_samples: usize,
    /// Latency ceiling per level, indexed by `level.value() - 1`.
    pub latency_ceilings_ms: [f64; 5],
    /// Criteria for recovering into levels 1 to 4, indexed by `level.value() - 1`.
    pub recovery: [RecoveryCriteria; 4],
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_recovery: true,
            max_consecutive_errors: 3,
            recovery_interval: Duration::from_secs(60),
            window_size: 100,
            min_recovery_samples: 20,
            latency_ceilings_ms: [20.0, 30.0, 80.0, 120.0, f64::INFINITY],
            recovery: [
                RecoveryCriteria {
                    max_avg_latency_ms: 15.0,
                    max_p95_latency_ms: Some(18.0),
                    max_error_rate: 0.03,
                    requires_gpu: true,
                },
                RecoveryCriteria {
                    max_avg_latency_ms: 25.0,
                    max_p95_latency_ms: None,
                    max_error_rate: 0.05,
                    requires_gpu: true,
                },
                RecoveryCriteria {
                    max_avg_latency_ms: 60.0,
                    max_p95_latency_ms: None,
                    max_error_rate: 0.10,
                    requires_gpu: false,
                },
                RecoveryCriteria {
                    max_avg_latency_ms: 100.0,
                    max_p95_latency_ms: None,
                    max_error_rate: 0.20,
                    requires_gpu: false,
                },
            ],
        }
    }
}

impl FallbackConfig {
    pub fn latency_ceiling_ms(&self, level: FallbackLevel) -> f64 {
        self.latency_ceilings_ms[level.value() as usize - 1]
    }

    pub fn recovery_criteria(&self, target: FallbackLevel) -> Option<&RecoveryCriteria> {
        self.recovery.get(target.value() as usize - 1)
    }
}

/// Point-in-time controller statistics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FallbackStatistics {
    pub current_level: u8,
    pub current_level_name: &'static str,
    pub description: &'static str,
    pub consecutive_errors: u32,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub error_rate: f64,
    pub samples_tracked: usize,
    pub enabled: bool,
    pub auto_recovery: bool,
}

#[derive(Debug)]
struct FallbackState {
    level: FallbackLevel,
    consecutive_errors: u32,
    latencies: RollingWindow,
    errors: RollingWindow,
    last_recovery_check: Instant,
    /// Last known GPU functional result; `None` until a health check ran.
    gpu_functional: Option<bool>,
}

pub struct FallbackController {
    config: FallbackConfig,
    state: Mutex<FallbackState>,
    /// Lock-free mirror of `state.level` for hot-path reads.
    level: AtomicU8,
    metrics: MetricsSink,
}

impl FallbackController {
    pub fn new(config: FallbackConfig, metrics: MetricsSink) -> Self {
        let state = FallbackState {
            level: FallbackLevel::BEST,
            consecutive_errors: 0,
            latencies: RollingWindow::new(config.window_size),
            errors: RollingWindow::new(config.window_size),
            last_recovery_check: Instant::now(),
            gpu_functional: None,
        };
        info!(target: "mob_ai::fallback", level = %FallbackLevel::BEST, "fallback controller initialized");
        metrics.set_fallback_level(FallbackLevel::BEST);
        Self {
            config,
            state: Mutex::new(state),
            level: AtomicU8::new(FallbackLevel::BEST.value()),
            metrics,
        }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    pub fn current_level(&self) -> FallbackLevel {
        FallbackLevel::from_value(self.level.load(Ordering::Acquire)).unwrap_or(FallbackLevel::WORST)
    }

    pub fn latency_ceiling_ms(&self) -> f64 {
        self.config.latency_ceiling_ms(self.current_level())
    }

    /// True at RULE_BASED_ML and TRADITIONAL_AI.
    pub fn should_skip_model_inference(&self) -> bool {
        self.current_level().skips_model_inference()
    }

    pub fn device_preference(&self) -> DevicePreference {
        self.current_level().device_preference()
    }

    /// Rule-table action at level 4, the traditional-AI sentinel at level 5,
    /// `None` where models should run.
    pub fn action_for_current_level(&self, state: &[f32]) -> Option<ActionId> {
        match self.current_level() {
            FallbackLevel::TraditionalAi => Some(ActionId::TRADITIONAL_AI),
            FallbackLevel::RuleBasedMl => Some(rule_based_action(state)),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Outcome reporting
    // ------------------------------------------------------------------

    pub fn record_success(&self, latency_ms: f64) {
        let mut state = self.lock();
        state.consecutive_errors = 0;
        state.latencies.push(latency_ms);
        state.errors.push(0.0);
    }

    pub fn record_error(&self, error: &dyn std::fmt::Display) {
        let mut state = self.lock();
        state.consecutive_errors += 1;
        state.errors.push(1.0);
        warn!(
            target: "mob_ai::fallback",
            consecutive_errors = state.consecutive_errors,
            level = %state.level,
            %error,
            "inference error"
        );

        if state.consecutive_errors >= self.config.max_consecutive_errors {
            let reason = format!("{} consecutive errors", state.consecutive_errors);
            if let Some(next) = state.level.worse() {
                self.transition(&mut state, next, &reason);
            } else {
                self.log_exhausted(&reason);
            }
            state.consecutive_errors = 0;
        }
    }

    /// Records a latency sample and escalates if it exceeds 1.5× the current
    /// ceiling.
    pub fn record_latency(&self, latency_ms: f64) {
        let mut state = self.lock();
        state.latencies.push(latency_ms);

        let ceiling = self.config.latency_ceiling_ms(state.level);
        if latency_ms > ceiling * 1.5 {
            warn!(
                target: "mob_ai::fallback",
                latency_ms,
                ceiling_ms = ceiling,
                level = %state.level,
                "latency violation"
            );
            let reason = format!("latency {latency_ms:.1}ms exceeds ceiling {ceiling:.1}ms");
            if let Some(next) = state.level.worse() {
                self.transition(&mut state, next, &reason);
            } else {
                self.log_exhausted(&reason);
            }
        }
    }

    /// Escalates to at least the level `snapshot` allows.
    pub fn apply_health(&self, snapshot: &HealthSnapshot) {
        let mut state = self.lock();
        let gpu = &snapshot.gpu;
        state.gpu_functional = Some(gpu.available && gpu.functional);

        let mut target = state.level;
        let mut reasons = Vec::new();

        if state.level == FallbackLevel::GpuFp16
            && (gpu.oom_risk || (gpu.available && gpu.status == HealthStatus::Critical && gpu.functional))
        {
            target = target.max(FallbackLevel::GpuInt8);
            reasons.push("VRAM pressure");
        }
        if state.level <= FallbackLevel::GpuInt8 && !(gpu.available && gpu.functional) {
            target = target.max(FallbackLevel::CpuInt8);
            reasons.push("GPU unavailable");
        }
        if state.level <= FallbackLevel::CpuInt8 && snapshot.cpu.status == HealthStatus::Critical {
            target = target.max(FallbackLevel::RuleBasedMl);
            reasons.push("CPU overload");
        }

        if target > state.level {
            self.transition(&mut state, target, &reasons.join(", "));
        }
    }

    /// Updates the GPU functional flag used by recovery admission.
    pub fn set_gpu_functional(&self, functional: bool) {
        self.lock().gpu_functional = Some(functional);
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    pub fn try_recover(&self) -> bool {
        self.try_recover_at(Instant::now())
    }

    /// Attempts one recovery step as of `now`. Returns whether the level
    /// improved.
    pub fn try_recover_at(&self, now: Instant) -> bool {
        if !self.config.enabled || !self.config.auto_recovery {
            return false;
        }
        let mut state = self.lock();
        if now.saturating_duration_since(state.last_recovery_check) < self.config.recovery_interval {
            return false;
        }
        state.last_recovery_check = now;

        let Some(target) = state.level.better() else {
            return false;
        };
        if !self.can_recover_to(&state, target) {
            return false;
        }

        let from = state.level;
        self.set_level(&mut state, target);
        info!(target: "mob_ai::fallback", %from, to = %target, "fallback recovery");
        true
    }

    /// Periodic tick. Returns whether the level changed.
    pub fn check_and_update_level(&self) -> bool {
        let before = self.current_level();
        if self.config.auto_recovery {
            self.try_recover();
        }
        before != self.current_level()
    }

    fn can_recover_to(&self, state: &FallbackState, target: FallbackLevel) -> bool {
        let min = self.config.min_recovery_samples;
        if state.latencies.len() < min || state.errors.len() < min {
            return false;
        }
        let Some(criteria) = self.config.recovery_criteria(target) else {
            return false;
        };
        criteria.admits(
            state.latencies.mean(),
            state.latencies.percentile(95.0),
            state.errors.mean(),
            state.gpu_functional.unwrap_or(false),
        )
    }

    // ------------------------------------------------------------------
    // Operator controls
    // ------------------------------------------------------------------

    /// Sets the level unconditionally.
    pub fn force_level(&self, level: FallbackLevel) {
        let mut state = self.lock();
        let from = state.level;
        self.set_level(&mut state, level);
        warn!(target: "mob_ai::fallback", %from, to = %level, "fallback level forced");
    }

    pub fn reset_error_count(&self) {
        self.lock().consecutive_errors = 0;
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.lock().consecutive_errors
    }

    pub fn statistics(&self) -> FallbackStatistics {
        let state = self.lock();
        FallbackStatistics {
            current_level: state.level.value(),
            current_level_name: state.level.name(),
            description: state.level.description(),
            consecutive_errors: state.consecutive_errors,
            avg_latency_ms: state.latencies.mean(),
            p95_latency_ms: state.latencies.percentile(95.0),
            error_rate: state.errors.mean(),
            samples_tracked: state.latencies.len(),
            enabled: self.config.enabled,
            auto_recovery: self.config.auto_recovery,
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn transition(&self, state: &mut FallbackState, next: FallbackLevel, reason: &str) {
        if !self.config.enabled {
            warn!(target: "mob_ai::fallback", reason, "escalation requested but fallback is disabled");
            return;
        }
        let from = state.level;
        self.set_level(state, next);
        error!(
            target: "mob_ai::fallback",
            from = %from,
            to = %next,
            reason,
            "fallback escalation"
        );
    }

    fn log_exhausted(&self, reason: &str) {
        error!(
            target: "mob_ai::fallback",
            level = %FallbackLevel::WORST,
            reason,
            "already at TRADITIONAL_AI, cannot escalate further"
        );
    }

    fn set_level(&self, state: &mut FallbackState, level: FallbackLevel) {
        let from = state.level;
        state.level = level;
        self.level.store(level.value(), Ordering::Release);
        if from != level {
            self.metrics.record_fallback_transition(from, level);
            self.metrics.set_fallback_level(level);
        }
    }

    fn lock(&self) -> MutexGuard<'_, FallbackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{CpuHealth, DiskHealth, GpuHealth, RamHealth};

    fn controller() -> FallbackController {
        FallbackController::new(FallbackConfig::default(), MetricsSink::new())
    }

    fn snapshot(gpu: GpuHealth, cpu_status: HealthStatus) -> HealthSnapshot {
        HealthSnapshot {
            timestamp: chrono::Utc::now(),
            overall: HealthStatus::Healthy,
            gpu,
            ram: RamHealth::default(),
            cpu: CpuHealth {
                status: cpu_status,
                ..CpuHealth::default()
            },
            disk: DiskHealth::default(),
        }
    }

    fn healthy_gpu() -> GpuHealth {
        GpuHealth {
            status: HealthStatus::Healthy,
            available: true,
            functional: true,
            vram_used_percent: Some(30.0),
            ..GpuHealth::default()
        }
    }

    #[test]
    fn latency_violation_escalates_once() {
        let c = controller();
        c.record_latency(25.0);
        assert_eq!(c.current_level(), FallbackLevel::GpuFp16, "within 1.5x");
        c.record_latency(31.0);
        assert_eq!(c.current_level(), FallbackLevel::GpuInt8);
    }

    #[test]
    fn disabled_controller_never_escalates() {
        let c = FallbackController::new(
            FallbackConfig {
                enabled: false,
                ..FallbackConfig::default()
            },
            MetricsSink::new(),
        );
        for _ in 0..10 {
            c.record_error(&"boom");
        }
        c.record_latency(10_000.0);
        assert_eq!(c.current_level(), FallbackLevel::GpuFp16);
    }

    #[test]
    fn action_per_level() {
        let c = controller();
        let state = vec![0.1; 64];
        assert_eq!(c.action_for_current_level(&state), None);
        assert!(!c.should_skip_model_inference());

        c.force_level(FallbackLevel::RuleBasedMl);
        assert_eq!(c.action_for_current_level(&state), Some(ActionId::FLEE));
        assert!(c.should_skip_model_inference());
        assert_eq!(c.device_preference(), DevicePreference::None);

        c.force_level(FallbackLevel::TraditionalAi);
        assert_eq!(c.action_for_current_level(&state), Some(ActionId::TRADITIONAL_AI));
    }

    #[test]
    fn health_snapshot_escalates_by_cause() {
        let c = controller();
        c.apply_health(&snapshot(healthy_gpu(), HealthStatus::Healthy));
        assert_eq!(c.current_level(), FallbackLevel::GpuFp16);

        let pressured = GpuHealth {
            status: HealthStatus::Critical,
            oom_risk: true,
            vram_used_percent: Some(97.0),
            ..healthy_gpu()
        };
        c.apply_health(&snapshot(pressured, HealthStatus::Healthy));
        assert_eq!(c.current_level(), FallbackLevel::GpuInt8);

        let broken = GpuHealth {
            functional: false,
            status: HealthStatus::Critical,
            ..healthy_gpu()
        };
        c.apply_health(&snapshot(broken.clone(), HealthStatus::Healthy));
        assert_eq!(c.current_level(), FallbackLevel::CpuInt8);

        c.apply_health(&snapshot(broken, HealthStatus::Critical));
        assert_eq!(c.current_level(), FallbackLevel::RuleBasedMl);
    }

    #[test]
    fn missing_gpu_from_best_level_goes_straight_to_cpu() {
        let c = controller();
        c.apply_health(&snapshot(GpuHealth::default(), HealthStatus::Healthy));
        assert_eq!(c.current_level(), FallbackLevel::CpuInt8);
    }

    #[test]
    fn recovery_needs_enough_samples() {
        let c = controller();
        c.force_level(FallbackLevel::RuleBasedMl);
        for _ in 0..5 {
            c.record_success(5.0);
        }
        let later = Instant::now() + Duration::from_secs(61);
        assert!(!c.try_recover_at(later));
        assert_eq!(c.current_level(), FallbackLevel::RuleBasedMl);
    }

    #[test]
    fn gpu_levels_need_functional_gpu_to_recover() {
        let c = controller();
        c.force_level(FallbackLevel::CpuInt8);
        for _ in 0..30 {
            c.record_success(5.0);
        }
        let later = Instant::now() + Duration::from_secs(61);
        assert!(!c.try_recover_at(later), "GPU state unknown");

        c.set_gpu_functional(true);
        assert!(c.try_recover_at(later + Duration::from_secs(61)));
        assert_eq!(c.current_level(), FallbackLevel::GpuInt8);
    }

    #[test]
    fn statistics_reflect_windows() {
        let c = controller();
        c.record_success(10.0);
        c.record_success(20.0);
        c.record_error(&"boom");
        let stats = c.statistics();
        assert_eq!(stats.current_level, 1);
        assert_eq!(stats.current_level_name, "GPU_FP16");
        assert_eq!(stats.consecutive_errors, 1);
        assert_eq!(stats.samples_tracked, 2);
        assert!((stats.avg_latency_ms - 15.0).abs() < 1e-9);
        assert!((stats.error_rate - 1.0 / 3.0).abs() < 1e-9);
    }
}
