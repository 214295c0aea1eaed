//! Service configuration read from the process environment.
//!
//! Every variable has a default, so an empty environment yields a working
//! single-node setup: in-memory queue and cache store, all archetypes and
//! model types, one worker loop.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use mob_ai_core::{Archetype, HashPrecision, ModelType};

use crate::cache::CacheConfig;
use crate::engine::EngineConfig;
use crate::fallback::FallbackConfig;
use crate::pipeline::PipelineConfig;
use crate::queue::PostgresQueueConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub fallback: FallbackConfig,
    pub pipeline: PipelineConfig,

    /// Archetypes loaded at startup.
    pub archetypes: Vec<Archetype>,
    /// Model types loaded at startup.
    pub model_types: Vec<ModelType>,

    pub batch_size: usize,
    pub poll_interval: Duration,
    pub worker_count: usize,
    /// Pause after a failed loop iteration.
    pub error_backoff: Duration,

    /// `None` selects the in-memory queue.
    pub database: Option<PostgresQueueConfig>,
    /// `None` selects the in-memory cache store.
    pub redis_url: Option<String>,

    pub health_check_interval: Duration,
    pub cleanup_interval: Duration,
    pub metrics_interval: Duration,
    pub retention: chrono::Duration,
    /// Claims still `processing` after this long are timed out.
    pub claim_timeout: chrono::Duration,

    pub metrics_port: u16,
    pub log_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            cache: CacheConfig::default(),
            fallback: FallbackConfig::default(),
            pipeline: PipelineConfig::default(),
            archetypes: Archetype::all().collect(),
            model_types: ModelType::all().collect(),
            batch_size: 128,
            poll_interval: Duration::from_millis(10),
            worker_count: 1,
            error_backoff: Duration::from_secs(1),
            database: None,
            redis_url: None,
            health_check_interval: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(60),
            metrics_interval: Duration::from_secs(5),
            retention: chrono::Duration::hours(24),
            claim_timeout: chrono::Duration::minutes(5),
            metrics_port: 9090,
            log_dir: PathBuf::from("./logs"),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);
        let mut config = Self::default();

        if let Some(dir) = env.string("MODEL_DIR") {
            config.engine.model_dir = PathBuf::from(dir);
        }
        if let Some(list) = env.list::<Archetype>("MODEL_ARCHETYPES")? {
            config.archetypes = list;
        }
        if let Some(list) = env.list::<ModelType>("MODEL_TYPES")? {
            config.model_types = list;
        }
        if let Some(primary) = env.parse::<ModelType>("PRIMARY_MODEL")? {
            config.engine.primary_model = primary;
        }
        if let Some(threshold) = env.parse::<f32>("COORDINATION_THRESHOLD")? {
            config.pipeline.coordination_threshold = threshold;
        }

        config.batch_size = env.parse("BATCH_SIZE")?.unwrap_or(config.batch_size).max(1);
        if let Some(ms) = env.parse::<u64>("POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        config.worker_count = env.parse("WORKER_COUNT")?.unwrap_or(config.worker_count).max(1);

        if let Some(url) = env.string("DATABASE_URL") {
            let mut db = PostgresQueueConfig::new(url);
            db.min_connections = env.parse("DB_MIN_CONNECTIONS")?.unwrap_or(db.min_connections);
            db.max_connections = env.parse("DB_MAX_CONNECTIONS")?.unwrap_or(db.max_connections);
            config.database = Some(db);
        }
        config.redis_url = env.string("REDIS_URL");

        config.cache.enabled = env.parse("CACHE_ENABLED")?.unwrap_or(config.cache.enabled);
        if let Some(decimals) = env.parse::<u8>("CACHE_HASH_PRECISION")? {
            config.cache.precision = HashPrecision::new(decimals);
        }
        if let Some(ms) = env.parse::<u64>("CACHE_L1_TTL_MS")? {
            config.cache.l1_ttl = Duration::from_millis(ms);
        }
        config.cache.l1_depth = env.parse("CACHE_L1_DEPTH")?.unwrap_or(config.cache.l1_depth);
        if let Some(secs) = env.parse::<u64>("CACHE_L2_TTL_SECS")? {
            config.cache.l2_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("CACHE_L3_TTL_SECS")? {
            config.cache.l3_ttl = Duration::from_secs(secs);
        }

        config.fallback.enabled = env.parse("FALLBACK_ENABLED")?.unwrap_or(config.fallback.enabled);
        config.fallback.auto_recovery = env
            .parse("FALLBACK_AUTO_RECOVERY")?
            .unwrap_or(config.fallback.auto_recovery);
        config.fallback.max_consecutive_errors = env
            .parse("FALLBACK_MAX_CONSECUTIVE_ERRORS")?
            .unwrap_or(config.fallback.max_consecutive_errors);
        if let Some(secs) = env.parse::<u64>("FALLBACK_RECOVERY_INTERVAL_SECS")? {
            config.fallback.recovery_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = env.parse::<u64>("HEALTH_CHECK_INTERVAL_SECS")? {
            config.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("CLEANUP_INTERVAL_SECS")? {
            config.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(hours) = env.parse::<i64>("RETENTION_HOURS")? {
            config.retention = chrono::Duration::hours(hours);
        }
        if let Some(secs) = env.parse::<i64>("CLAIM_TIMEOUT_SECS")? {
            config.claim_timeout = chrono::Duration::seconds(secs);
        }

        config.metrics_port = env.parse("METRICS_PORT")?.unwrap_or(config.metrics_port);
        if let Some(dir) = env.string("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(var)
            .map(|value| {
                value.parse::<T>().map_err(|e| ConfigError {
                    var,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn list<T>(&self, var: &'static str) -> Result<Option<Vec<T>>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(value) = self.string(var) else {
            return Ok(None);
        };
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.parse::<T>().map_err(|e| ConfigError {
                    var,
                    value: item.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}
