use std::time::Duration;

use tokio::time::Instant;

use mob_ai_core::{DevicePreference, FallbackLevel};
use mob_ai_runtime::{FallbackConfig, FallbackController, MetricsSink};

fn controller(config: FallbackConfig) -> FallbackController {
    FallbackController::new(config, MetricsSink::new())
}

#[test]
fn consecutive_errors_escalate_one_level_and_reset() {
    let fallback = controller(FallbackConfig::default());
    assert_eq!(fallback.current_level(), FallbackLevel::GpuFp16);

    fallback.record_error(&"timeout");
    fallback.record_error(&"timeout");
    assert_eq!(fallback.current_level(), FallbackLevel::GpuFp16);
    assert_eq!(fallback.consecutive_errors(), 2);

    // A success in between breaks the streak.
    fallback.record_success(5.0);
    fallback.record_error(&"timeout");
    fallback.record_error(&"timeout");
    assert_eq!(fallback.current_level(), FallbackLevel::GpuFp16);

    fallback.record_error(&"timeout");
    assert_eq!(fallback.current_level(), FallbackLevel::GpuInt8);
    assert_eq!(fallback.consecutive_errors(), 0);
    assert_eq!(fallback.device_preference(), DevicePreference::GpuInt8);
}

#[test]
fn never_escalates_past_traditional_ai() {
    let fallback = controller(FallbackConfig::default());
    fallback.force_level(FallbackLevel::TraditionalAi);

    for _ in 0..10 {
        fallback.record_error(&"model unavailable");
    }
    fallback.record_latency(10_000.0);

    assert_eq!(fallback.current_level(), FallbackLevel::TraditionalAi);
    assert!(fallback.should_skip_model_inference());
    assert_eq!(fallback.device_preference(), DevicePreference::None);
}

#[test]
fn recovery_waits_for_the_interval_and_moves_one_step() {
    let config = FallbackConfig {
        recovery_interval: Duration::from_secs(60),
        min_recovery_samples: 5,
        ..FallbackConfig::default()
    };
    let fallback = controller(config);
    fallback.force_level(FallbackLevel::RuleBasedMl);
    fallback.set_gpu_functional(true);
    for _ in 0..10 {
        fallback.record_success(4.0);
    }

    let start = Instant::now();
    assert!(!fallback.try_recover_at(start));
    assert_eq!(fallback.current_level(), FallbackLevel::RuleBasedMl);

    assert!(fallback.try_recover_at(start + Duration::from_secs(61)));
    assert_eq!(fallback.current_level(), FallbackLevel::CpuInt8);

    // The interval restarts at every check.
    assert!(!fallback.try_recover_at(start + Duration::from_secs(90)));
    assert_eq!(fallback.current_level(), FallbackLevel::CpuInt8);

    assert!(fallback.try_recover_at(start + Duration::from_secs(122)));
    assert_eq!(fallback.current_level(), FallbackLevel::GpuInt8);
}

#[test]
fn disabled_auto_recovery_holds_the_level() {
    let config = FallbackConfig {
        auto_recovery: false,
        min_recovery_samples: 1,
        ..FallbackConfig::default()
    };
    let fallback = controller(config);
    fallback.force_level(FallbackLevel::CpuInt8);
    fallback.set_gpu_functional(true);
    fallback.record_success(1.0);

    assert!(!fallback.try_recover_at(Instant::now() + Duration::from_secs(3600)));
    assert!(!fallback.check_and_update_level());
    assert_eq!(fallback.current_level(), FallbackLevel::CpuInt8);
}
