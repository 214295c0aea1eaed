//! Monster AI inference service runtime.
//!
//! This crate wires together the request queue, tiered cache, model engine,
//! fallback controller and health monitor into a long-running service.
//! Consumers build a [`Service`] with [`ServiceBuilder`] and steer it through
//! [`ServiceHandle`].
//!
//! Modules are organized by responsibility:
//! - [`service`] hosts the orchestrator and builder
//! - [`api`] exposes the types downstream clients interact with
//! - [`engine`] loads models and runs batched and pack-coordinated inference
//! - [`pipeline`] turns a claimed batch into responses
//! - [`cache`], [`queue`] and [`coordination`] adapt external stores
//! - [`fallback`] and [`health`] decide how much of the pipeline may run
//! - [`workers`] keeps background tasks internal to the crate
pub mod api;
pub mod cache;
pub mod config;
pub mod coordination;
pub mod engine;
pub mod fallback;
pub mod health;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod service;
pub mod stats;

mod workers;

pub use api::{Result, ServiceError, ServiceHandle, ServiceHealth, ServiceStatistics};
pub use cache::{CacheConfig, CacheStats, InMemoryKvStore, KeyValueStore, RedisKvStore, TieredCache};
pub use config::{ConfigError, ServiceConfig};
pub use coordination::{InMemoryPackGraph, InMemorySignalBoard, PackGraph, SignalSource};
pub use engine::{BackendRegistry, EngineConfig, EngineError, InferenceEngine, ReloadReport};
pub use fallback::{FallbackConfig, FallbackController};
pub use health::{HealthMonitor, HealthSnapshot, HealthStatus};
pub use self::metrics::MetricsSink;
pub use pipeline::{DecisionPipeline, PipelineConfig};
pub use processor::RequestProcessor;
pub use queue::{InMemoryRequestQueue, PostgresQueue, PostgresQueueConfig, QueueError, RequestQueue};
pub use service::{Service, ServiceBuilder};
pub use workers::WorkerStats;
