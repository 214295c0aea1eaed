//! High-level service orchestrator.
//!
//! [`ServiceBuilder`] constructs every component exactly once, loads models,
//! and spawns the worker loops. [`Service`] owns the background tasks;
//! [`ServiceHandle`] is the cloneable façade operators use.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use mob_ai_core::{DevicePreference, FallbackLevel};

use crate::api::{Result, ServiceError, ServiceHandle};
use crate::cache::{InMemoryKvStore, KeyValueStore, RedisKvStore, TieredCache};
use crate::config::ServiceConfig;
use crate::coordination::{InMemoryPackGraph, InMemorySignalBoard, PackGraph, SignalSource};
use crate::engine::{BackendRegistry, InferenceEngine};
use crate::fallback::FallbackController;
use crate::health::{GpuProbe, HealthMonitor, HostProbe, NvidiaSmiProbe, SysinfoProbe};
use crate::metrics::MetricsSink;
use crate::pipeline::DecisionPipeline;
use crate::processor::RequestProcessor;
use crate::queue::{InMemoryRequestQueue, PostgresQueue, RequestQueue};
use crate::workers::{Command, InferenceWorker, MaintenanceWorker, WorkerCounters, worker_id};

const COMMAND_BUFFER_SIZE: usize = 32;

/// Everything the worker loops share.
pub(crate) struct Components {
    pub config: ServiceConfig,
    pub engine: Arc<InferenceEngine>,
    pub cache: Arc<TieredCache>,
    pub fallback: Arc<FallbackController>,
    pub health: Arc<HealthMonitor>,
    pub processor: Arc<RequestProcessor>,
    pub pipeline: Arc<DecisionPipeline>,
    pub metrics: MetricsSink,
    pub counters: WorkerCounters,
    pub started: Instant,
}

pub struct Service {
    handle: ServiceHandle,
    components: Arc<Components>,
    shutdown_tx: watch::Sender<bool>,
    worker_handles: Vec<JoinHandle<()>>,
    maintenance_handle: JoinHandle<()>,
}

impl Service {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    /// Cloneable handle for operator commands.
    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.components.engine
    }

    pub fn fallback(&self) -> &Arc<FallbackController> {
        &self.components.fallback
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.components.cache
    }

    /// Signals every loop to stop, waits for them, then releases models.
    pub async fn shutdown(self) -> Result<()> {
        info!(target: "mob_ai::worker", "shutting down service");
        // Receivers are held by the loops until they exit.
        let _ = self.shutdown_tx.send(true);

        for handle in self.worker_handles {
            handle.await.map_err(ServiceError::WorkerJoin)?;
        }
        self.maintenance_handle
            .await
            .map_err(ServiceError::WorkerJoin)?;

        self.components.engine.unload_all();
        info!(target: "mob_ai::worker", "service stopped");
        Ok(())
    }
}

/// Builder for [`Service`]. Collaborators not supplied explicitly are
/// derived from the configuration.
pub struct ServiceBuilder {
    config: ServiceConfig,
    queue: Option<Arc<dyn RequestQueue>>,
    cache_store: Option<Arc<dyn KeyValueStore>>,
    gpu_probe: Option<Arc<dyn GpuProbe>>,
    host_probe: Option<Arc<dyn HostProbe>>,
    signals: Option<Arc<dyn SignalSource>>,
    graph: Option<Arc<dyn PackGraph>>,
    backends: Option<BackendRegistry>,
    metrics: Option<MetricsSink>,
}

impl ServiceBuilder {
    fn new() -> Self {
        Self {
            config: ServiceConfig::default(),
            queue: None,
            cache_store: None,
            gpu_probe: None,
            host_probe: None,
            signals: None,
            graph: None,
            backends: None,
            metrics: None,
        }
    }

    /// Override service configuration
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `queue` instead of connecting to `DATABASE_URL`.
    pub fn queue(mut self, queue: Arc<dyn RequestQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Use `store` instead of connecting to `REDIS_URL`.
    pub fn cache_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn health_probes(mut self, gpu: Arc<dyn GpuProbe>, host: Arc<dyn HostProbe>) -> Self {
        self.gpu_probe = Some(gpu);
        self.host_probe = Some(host);
        self
    }

    pub fn signal_source(mut self, signals: Arc<dyn SignalSource>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn pack_graph(mut self, graph: Arc<dyn PackGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn metrics(mut self, metrics: MetricsSink) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Connects stores, loads models and spawns the worker loops.
    pub async fn build(self) -> Result<Service> {
        let config = self.config;
        let metrics = self.metrics.unwrap_or_default();

        let queue: Arc<dyn RequestQueue> = match (self.queue, &config.database) {
            (Some(queue), _) => queue,
            (None, Some(db)) => {
                let queue = PostgresQueue::connect(db).await?;
                queue.ensure_schema().await?;
                Arc::new(queue)
            }
            (None, None) => {
                warn!(target: "mob_ai::processor", "DATABASE_URL not set, using in-memory request queue");
                Arc::new(InMemoryRequestQueue::new())
            }
        };

        let store: Arc<dyn KeyValueStore> = match (self.cache_store, &config.redis_url) {
            (Some(store), _) => store,
            (None, Some(url)) => Arc::new(RedisKvStore::connect(url).await?),
            (None, None) => {
                warn!(target: "mob_ai::cache", "REDIS_URL not set, using in-memory cache store");
                Arc::new(InMemoryKvStore::new())
            }
        };
        let cache = Arc::new(TieredCache::new(store, config.cache.clone(), metrics.clone()));

        let fallback = Arc::new(FallbackController::new(config.fallback.clone(), metrics.clone()));

        let gpu = self.gpu_probe.unwrap_or_else(|| Arc::new(NvidiaSmiProbe));
        let host = self
            .host_probe
            .unwrap_or_else(|| Arc::new(SysinfoProbe::new(config.engine.model_dir.clone())));
        let health = Arc::new(HealthMonitor::new(gpu, host));

        // Settle the starting level before choosing a device for the models.
        let monitor = health.clone();
        match tokio::task::spawn_blocking(move || monitor.full_health_check()).await {
            Ok(snapshot) => {
                metrics.set_resource_usage(&snapshot);
                fallback.apply_health(&snapshot);
            }
            Err(e) => warn!(target: "mob_ai::health", error = %e, "initial health check failed"),
        }

        let mut engine_config = config.engine.clone();
        engine_config.device = match fallback.device_preference() {
            DevicePreference::None => DevicePreference::CpuInt8,
            device => device,
        };
        let mut engine = InferenceEngine::new(engine_config, fallback.clone(), metrics.clone())
            .with_cache(cache.clone());
        if let Some(backends) = self.backends {
            engine = engine.with_registry(backends);
        }
        let engine = Arc::new(engine);

        let (loaded, expected) = engine
            .load_all_models(&config.archetypes, &config.model_types)
            .await;
        if loaded == 0 {
            error!(target: "mob_ai::worker", expected, "no models loaded, deferring to traditional AI");
            fallback.force_level(FallbackLevel::TraditionalAi);
        }
        metrics.set_fallback_level(fallback.current_level());

        let processor = Arc::new(RequestProcessor::new(queue, config.batch_size, metrics.clone()));
        let pipeline = Arc::new(DecisionPipeline::new(
            engine.clone(),
            Some(cache.clone()),
            fallback.clone(),
            self.signals
                .unwrap_or_else(|| Arc::new(InMemorySignalBoard::new())),
            self.graph.unwrap_or_else(|| Arc::new(InMemoryPackGraph::new())),
            metrics.clone(),
            config.pipeline,
        ));

        let worker_count = config.worker_count;
        let components = Arc::new(Components {
            config,
            engine,
            cache,
            fallback,
            health,
            processor,
            pipeline,
            metrics,
            counters: WorkerCounters::new(),
            started: Instant::now(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel::<Command>(COMMAND_BUFFER_SIZE);

        let instance = std::process::id();
        let worker_handles = (1..=worker_count as u32)
            .map(|index| {
                let id = worker_id(instance, index);
                let worker = InferenceWorker::new(id, components.clone(), shutdown_rx.clone());
                tokio::spawn(async move {
                    worker.run().await;
                })
            })
            .collect();

        let maintenance = MaintenanceWorker::new(components.clone(), command_rx, shutdown_rx);
        let maintenance_handle = tokio::spawn(async move {
            maintenance.run().await;
        });

        info!(
            target: "mob_ai::worker",
            workers = worker_count,
            models = loaded,
            level = %components.fallback.current_level(),
            "service started"
        );

        Ok(Service {
            handle: ServiceHandle::new(command_tx),
            components,
            shutdown_tx,
            worker_handles,
            maintenance_handle,
        })
    }
}
