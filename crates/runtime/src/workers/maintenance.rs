//! Periodic duties and operator commands.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use mob_ai_core::DevicePreference;

use crate::api::{ServiceHealth, ServiceStatistics};
use crate::service::Components;

use super::{Command, shutdown_signalled};

pub struct MaintenanceWorker {
    components: Arc<Components>,
    command_rx: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
}

impl MaintenanceWorker {
    pub(crate) fn new(
        components: Arc<Components>,
        command_rx: mpsc::Receiver<Command>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            components,
            command_rx,
            shutdown,
        }
    }

    /// Main worker loop. Returns once shutdown is signalled.
    pub async fn run(mut self) {
        let config = &self.components.config;
        let mut health = interval(config.health_check_interval);
        let mut cleanup = interval(config.cleanup_interval);
        let mut refresh = interval(config.metrics_interval);
        for ticker in [&mut health, &mut cleanup, &mut refresh] {
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!(target: "mob_ai::worker", "maintenance worker started");
        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut self.shutdown) => break,
                Some(cmd) = self.command_rx.recv() => self.handle_command(cmd).await,
                _ = health.tick() => self.health_tick().await,
                _ = cleanup.tick() => self.cleanup_tick().await,
                _ = refresh.tick() => self.refresh_metrics().await,
            }
        }
        info!(target: "mob_ai::worker", "maintenance worker stopped");
    }

    async fn handle_command(&self, cmd: Command) {
        let c = &self.components;
        match cmd {
            Command::ReloadModel { key, path, reply } => {
                let result = c.engine.reload_model(key, path).await;
                if reply.send(result).is_err() {
                    debug!(target: "mob_ai::worker", "ReloadModel reply channel closed (caller dropped)");
                }
            }
            Command::ReloadAll { reply } => {
                let results = c.engine.reload_all_models().await;
                if reply.send(results).is_err() {
                    debug!(target: "mob_ai::worker", "ReloadAll reply channel closed (caller dropped)");
                }
            }
            Command::ForceLevel { level, reply } => {
                c.fallback.force_level(level);
                c.metrics.set_fallback_level(level);
                self.follow_device_preference().await;
                if reply.send(()).is_err() {
                    debug!(target: "mob_ai::worker", "ForceLevel reply channel closed (caller dropped)");
                }
            }
            Command::ClearCache { pattern, reply } => {
                let removed = c.cache.clear(pattern.as_deref()).await;
                if reply.send(removed).is_err() {
                    debug!(target: "mob_ai::worker", "ClearCache reply channel closed (caller dropped)");
                }
            }
            Command::Statistics { reply } => {
                if reply.send(self.statistics()).is_err() {
                    debug!(target: "mob_ai::worker", "Statistics reply channel closed (caller dropped)");
                }
            }
            Command::HealthCheck { reply } => {
                let health = self.health_report().await;
                if reply.send(health).is_err() {
                    debug!(target: "mob_ai::worker", "HealthCheck reply channel closed (caller dropped)");
                }
            }
        }
    }

    /// Samples the host, feeds the fallback controller and attempts
    /// recovery.
    async fn health_tick(&self) {
        let c = &self.components;
        let monitor = c.health.clone();
        let snapshot = match tokio::task::spawn_blocking(move || monitor.full_health_check()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(target: "mob_ai::health", error = %e, "health check task failed");
                return;
            }
        };

        c.metrics.set_resource_usage(&snapshot);
        c.fallback.apply_health(&snapshot);
        if c.fallback.check_and_update_level() {
            debug!(target: "mob_ai::worker", level = %c.fallback.current_level(), "fallback level recovered");
        }
        c.metrics.set_fallback_level(c.fallback.current_level());
        self.follow_device_preference().await;

        if !c.cache.health_check().await {
            warn!(target: "mob_ai::cache", "cache store unreachable, running without shared tiers");
        }
    }

    /// Reloads every model when the fallback level asks for a different
    /// device than the one models were loaded for.
    async fn follow_device_preference(&self) {
        let c = &self.components;
        let desired = c.fallback.device_preference();
        if desired == DevicePreference::None || desired == c.engine.device() {
            return;
        }
        let results = c.engine.reload_all_with_device(desired).await;
        let failed = results.values().filter(|ok| !**ok).count();
        if failed > 0 {
            warn!(target: "mob_ai::worker", device = %desired, failed, "some models failed to reload for new device");
        }
    }

    async fn cleanup_tick(&self) {
        let c = &self.components;
        c.processor.expire_claims(c.config.claim_timeout).await;
        c.processor.cleanup(c.config.retention).await;
        let purged = c.cache.purge_working_memory();
        if purged > 0 {
            debug!(target: "mob_ai::cache", purged, "expired working-memory entries purged");
        }
        c.cache.purge_expired().await;
    }

    async fn refresh_metrics(&self) {
        let c = &self.components;
        c.metrics.update_uptime();
        c.metrics.set_cache_stats(&c.cache.stats());
        let pool = c.processor.pool_status();
        c.metrics.set_db_pool(pool.size, pool.idle);
        let pending = c.processor.pending_count().await;

        let workers = c.counters.snapshot();
        debug!(
            target: "mob_ai::worker",
            pending,
            batches = workers.batches,
            requests = workers.requests,
            avg_batch_ms = workers.avg_batch_ms,
            level = %c.fallback.current_level(),
            "service stats"
        );
    }

    fn statistics(&self) -> ServiceStatistics {
        let c = &self.components;
        ServiceStatistics {
            uptime_secs: c.started.elapsed().as_secs(),
            workers: c.counters.snapshot(),
            processor: c.processor.statistics(),
            engine: c.engine.statistics(),
            fallback: c.fallback.statistics(),
            cache: c.cache.stats(),
        }
    }

    async fn health_report(&self) -> ServiceHealth {
        let c = &self.components;
        let system = c.health.latest();
        let device_available = system.as_ref().is_some_and(|s| s.gpu.available && s.gpu.functional);
        let engine = c.engine.health_check(device_available);
        let processor = c.processor.health_check().await;
        let cache_connected = c.cache.health_check().await;
        ServiceHealth {
            status: ServiceHealth::overall(&engine, &processor, cache_connected, system.as_ref()),
            fallback_level: c.fallback.current_level().value(),
            engine,
            processor,
            cache_connected,
            system,
        }
    }
}
