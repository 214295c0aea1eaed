//! Model loading, batched inference and hot reload.
//!
//! The engine keeps one published [`ModelRecord`] per (archetype, model
//! type). Batches are grouped by model key so every group costs exactly one
//! model call, and groups run concurrently on blocking threads. Outcomes are
//! reported to the [`FallbackController`] and the [`MetricsSink`]; the
//! engine itself never changes the fallback level.
//!
//! Absence is never an error here: a key with no loaded model answers with
//! the safe default action, and a failing group answers its own rows without
//! affecting the other groups of the batch.

mod backend;
mod coordination;
mod dense;
#[cfg(feature = "onnx")]
mod onnx;
mod record;
mod registry;

pub use backend::{BackendError, ModelBackend, ModelSession, TensorSpec};
pub use coordination::{PackDecision, coordination_score};
pub use dense::{Activation, DenseBackend, DenseLayer, DensePolicy, DenseSession};
#[cfg(feature = "onnx")]
pub use onnx::{OnnxBackend, OnnxSession};
pub use record::{ModelInfo, ModelRecord};
pub use registry::BackendRegistry;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use mob_ai_core::{
    ActionId, Archetype, DevicePreference, ModelKey, ModelType, STATE_DIM, Tensor,
    argmax_with_confidence,
};

use crate::cache::TieredCache;
use crate::coordination::SIGNAL_DIM;
use crate::fallback::FallbackController;
use crate::metrics::MetricsSink;
use crate::stats::{LatencySummary, RollingWindow};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no artifact for {key} under {dir}")]
    ArtifactNotFound { key: ModelKey, dir: PathBuf },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("{key}: incompatible {tensor} shape, loaded {loaded} vs candidate {candidate}")]
    IncompatibleShape {
        key: ModelKey,
        tensor: &'static str,
        loaded: String,
        candidate: String,
    },

    #[error("{key}: synthetic forward pass failed: {source}")]
    SyntheticPass {
        key: ModelKey,
        #[source]
        source: BackendError,
    },

    #[error("batch has {states} states but {archetypes} archetypes")]
    BatchMismatch { states: usize, archetypes: usize },

    #[error("model task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub model_dir: PathBuf,
    /// Model type used for individual decisions.
    pub primary_model: ModelType,
    /// Initial device preference.
    pub device: DevicePreference,
    /// Latency samples kept per model type.
    pub stats_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("./models"),
            primary_model: ModelType::CombatDqn,
            device: DevicePreference::GpuFp16,
            stats_window: 1000,
        }
    }
}

/// Where a decision came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOrigin {
    /// Fresh model call
    Model,
    /// Model-output cache (L3) hit
    CachedOutput,
    /// No model loaded for the key; safe default
    MissingModel,
    /// The group's model call failed; safe default
    GroupFailed,
}

/// One row's answer from the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub model: ModelKey,
    pub action: ActionId,
    pub confidence: f32,
    pub origin: DecisionOrigin,
    /// Raw output row, when a model (or its cached output) produced one.
    pub scores: Option<Vec<f32>>,
}

impl Decision {
    fn safe_default(model: ModelKey, origin: DecisionOrigin) -> Self {
        Self {
            model,
            action: ActionId::safe_default(),
            confidence: 0.0,
            origin,
            scores: None,
        }
    }

    /// Arg-max over a score row, or the raw value when the row is already a
    /// discrete prediction.
    fn from_output(model: ModelKey, scores: Vec<f32>, origin: DecisionOrigin) -> Self {
        let (action, confidence) = match scores.as_slice() {
            [] => (ActionId::safe_default(), 0.0),
            [value] if value.is_finite() && *value >= 0.0 => {
                (ActionId::from_index(value.round() as usize), 1.0)
            }
            [_] => (ActionId::safe_default(), 0.0),
            row => argmax_with_confidence(row)
                .map(|(index, confidence)| (ActionId::from_index(index), confidence))
                .unwrap_or((ActionId::safe_default(), 0.0)),
        };
        Self {
            model,
            action,
            confidence,
            origin,
            scores: Some(scores),
        }
    }

    /// Whether a model actually answered (fresh or cached).
    pub fn is_model_answer(&self) -> bool {
        matches!(self.origin, DecisionOrigin::Model | DecisionOrigin::CachedOutput)
    }
}

/// Outcome of a successful (re)load.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReloadReport {
    pub archetype: &'static str,
    pub model_type: &'static str,
    pub path: PathBuf,
    pub previous_version: Option<u64>,
    pub version: u64,
    pub reload_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineHealthStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineHealth {
    pub status: EngineHealthStatus,
    pub message: String,
    pub models_loaded: usize,
    pub device_available: bool,
    pub avg_latency_ms: f64,
    pub inference_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineStatistics {
    pub models_loaded: usize,
    pub total_inferences: u64,
    pub model_calls: u64,
    pub avg_latency_ms: f64,
    pub device: String,
    pub backends: Vec<&'static str>,
    pub model_latencies: BTreeMap<String, LatencySummary>,
}

/// Result of one group's blocking model call.
struct GroupRun {
    key: ModelKey,
    record: Arc<ModelRecord>,
    indices: Vec<usize>,
    cache_keys: Vec<Option<String>>,
    result: std::result::Result<Tensor, BackendError>,
    latency_ms: f64,
}

pub struct InferenceEngine {
    config: EngineConfig,
    registry: BackendRegistry,
    models: RwLock<HashMap<ModelKey, Arc<ModelRecord>>>,
    reload_lock: tokio::sync::Mutex<()>,
    /// Publication and L3 invalidation take this exclusively; L3 stores
    /// take it shared after checking their record is still published.
    l3_gate: tokio::sync::RwLock<()>,
    device: RwLock<DevicePreference>,
    cache: Option<Arc<TieredCache>>,
    fallback: Arc<FallbackController>,
    metrics: MetricsSink,
    latencies: Mutex<HashMap<ModelType, RollingWindow>>,
    rows_inferred: AtomicU64,
    model_calls: AtomicU64,
    total_latency_us: AtomicU64,
}

impl InferenceEngine {
    pub fn new(config: EngineConfig, fallback: Arc<FallbackController>, metrics: MetricsSink) -> Self {
        let device = config.device;
        Self {
            config,
            registry: BackendRegistry::default(),
            models: RwLock::new(HashMap::new()),
            reload_lock: tokio::sync::Mutex::new(()),
            l3_gate: tokio::sync::RwLock::new(()),
            device: RwLock::new(device),
            cache: None,
            fallback,
            metrics,
            latencies: Mutex::new(HashMap::new()),
            rows_inferred: AtomicU64::new(0),
            model_calls: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
        }
    }

    /// Enables the model-output (L3) tier.
    pub fn with_cache(mut self, cache: Arc<TieredCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> DevicePreference {
        *self.device.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_device(&self, device: DevicePreference) {
        *self.device.write().unwrap_or_else(PoisonError::into_inner) = device;
    }

    fn get(&self, key: ModelKey) -> Option<Arc<ModelRecord>> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    /// Shared L3 gate, granted only while `record` is the published model
    /// for its key. Outputs of a replaced model must not reach L3 after the
    /// reload cleared it.
    async fn l3_gate_for(&self, record: &Arc<ModelRecord>) -> Option<tokio::sync::RwLockReadGuard<'_, ()>> {
        let gate = self.l3_gate.read().await;
        let current = self.get(record.key)?;
        Arc::ptr_eq(&current, record).then_some(gate)
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Loads every (archetype, model type) pair that has an artifact.
    /// Returns `(loaded, expected)`.
    pub async fn load_all_models(&self, archetypes: &[Archetype], model_types: &[ModelType]) -> (usize, usize) {
        let expected = archetypes.len() * model_types.len();
        info!(
            target: "mob_ai::engine",
            expected,
            dir = %self.config.model_dir.display(),
            device = %self.device(),
            backends = ?self.registry.names(),
            "loading models"
        );

        let mut loaded = 0;
        for &archetype in archetypes {
            for &model_type in model_types {
                let key = ModelKey::new(archetype, model_type);
                match self.load_model(key).await {
                    Ok(true) => loaded += 1,
                    Ok(false) => debug!(target: "mob_ai::engine", %key, "no artifact, skipping"),
                    Err(e) => error!(target: "mob_ai::engine", %key, error = %e, "model load failed"),
                }
            }
        }

        if loaded == 0 {
            error!(target: "mob_ai::engine", expected, "no models loaded");
        } else if loaded < expected {
            warn!(target: "mob_ai::engine", loaded, expected, "some models missing");
        } else {
            info!(target: "mob_ai::engine", loaded, "all models loaded");
        }
        (loaded, expected)
    }

    /// Loads `key` from the model tree. `Ok(false)` when no artifact exists.
    pub async fn load_model(&self, key: ModelKey) -> Result<bool> {
        let _guard = self.reload_lock.lock().await;
        let Some((path, backend)) = self.registry.resolve(&self.config.model_dir, key, self.device()) else {
            return Ok(false);
        };
        self.install(key, path, backend).await?;
        Ok(true)
    }

    /// Replaces the model for `key` with the artifact at `path` (or the
    /// default location). All-or-nothing: any failure leaves the published
    /// model untouched.
    pub async fn reload_model(&self, key: ModelKey, path: Option<PathBuf>) -> Result<ReloadReport> {
        let _guard = self.reload_lock.lock().await;

        let resolved = match path {
            Some(path) => self
                .registry
                .for_path(&path)
                .map(|backend| (path.clone(), backend))
                .ok_or(EngineError::Backend(BackendError::Unsupported(path))),
            None => self
                .registry
                .resolve(&self.config.model_dir, key, self.device())
                .ok_or_else(|| EngineError::ArtifactNotFound {
                    key,
                    dir: self.config.model_dir.clone(),
                }),
        };

        let result = match resolved {
            Ok((path, backend)) => self.install(key, path, backend).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            error!(target: "mob_ai::engine", %key, error = %e, "model reload rejected");
            self.metrics.record_model_reload(key, false);
        }
        result
    }

    /// Reloads every loaded model from its default location.
    pub async fn reload_all_models(&self) -> BTreeMap<ModelKey, bool> {
        let mut results = BTreeMap::new();
        for key in self.loaded_models() {
            let ok = self.reload_model(key, None).await.is_ok();
            results.insert(key, ok);
        }
        let failed = results.values().filter(|ok| !**ok).count();
        info!(target: "mob_ai::engine", total = results.len(), failed, "reload of all models finished");
        results
    }

    /// Switches device preference and reloads every model for it.
    pub async fn reload_all_with_device(&self, device: DevicePreference) -> BTreeMap<ModelKey, bool> {
        let previous = self.device();
        self.set_device(device);
        info!(target: "mob_ai::engine", from = %previous, to = %device, "device preference changed");
        self.reload_all_models().await
    }

    async fn install(
        &self,
        key: ModelKey,
        path: PathBuf,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<ReloadReport> {
        let device = self.device();
        let backend_name = backend.name();

        let load_path = path.clone();
        let session = tokio::task::spawn_blocking(move || backend.load(&load_path, device))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))??;

        let previous = self.get(key);
        if let Some(previous) = &previous {
            for (tensor, loaded, candidate) in [
                ("input", &previous.input, session.input()),
                ("output", &previous.output, session.output()),
            ] {
                if !loaded.is_compatible_with(candidate) {
                    return Err(EngineError::IncompatibleShape {
                        key,
                        tensor,
                        loaded: loaded.describe(),
                        candidate: candidate.describe(),
                    });
                }
            }
        }

        // One synthetic forward pass proves the artifact is executable.
        let width = session
            .input()
            .row_width()
            .unwrap_or_else(|| default_input_width(key.model_type));
        let probe_session = session.clone();
        tokio::task::spawn_blocking(move || {
            let probe = Tensor::new(vec![1, width], vec![0.0; width])
                .map_err(|e| BackendError::Execution(e.to_string()))?;
            probe_session.run(&probe)
        })
        .await
        .map_err(|e| EngineError::Task(e.to_string()))?
        .map_err(|source| EngineError::SyntheticPass { key, source })?;

        let record = Arc::new(ModelRecord {
            key,
            input: session.input().clone(),
            output: session.output().clone(),
            session,
            backend: backend_name,
            version: record::file_version(&path),
            reload_count: previous.as_ref().map_or(0, |p| p.reload_count + 1),
            loaded_at: chrono::Utc::now(),
            path: path.clone(),
            device,
        });

        let gate = self.l3_gate.write().await;
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, record.clone());

        if previous.is_some()
            && let Some(cache) = &self.cache
        {
            let pattern = format!("l3:{}:{}:*", key.archetype, key.model_type);
            cache.clear(Some(&pattern)).await;
        }
        drop(gate);

        self.metrics.set_model_loaded(key, true);
        if previous.is_some() {
            self.metrics.record_model_reload(key, true);
        }
        info!(
            target: "mob_ai::engine",
            %key,
            path = %path.display(),
            input = %record.input.describe(),
            output = %record.output.describe(),
            version = record.version,
            reload_count = record.reload_count,
            "model published"
        );

        Ok(ReloadReport {
            archetype: key.archetype.as_str(),
            model_type: key.model_type.as_str(),
            path,
            previous_version: previous.map(|p| p.version),
            version: record.version,
            reload_count: record.reload_count,
        })
    }

    pub fn unload_model(&self, key: ModelKey) -> bool {
        let removed = self
            .models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .is_some();
        if removed {
            self.metrics.set_model_loaded(key, false);
            info!(target: "mob_ai::engine", %key, "model unloaded");
        }
        removed
    }

    /// Returns the number of models released.
    pub fn unload_all(&self) -> usize {
        let drained: Vec<ModelKey> = self
            .models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(key, _)| key)
            .collect();
        for &key in &drained {
            self.metrics.set_model_loaded(key, false);
        }
        info!(target: "mob_ai::engine", count = drained.len(), "all models unloaded");
        drained.len()
    }

    pub fn is_model_loaded(&self, key: ModelKey) -> bool {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key)
    }

    pub fn loaded_models(&self) -> Vec<ModelKey> {
        let mut keys: Vec<ModelKey> = self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        keys.sort();
        keys
    }

    pub fn model_info(&self, key: ModelKey) -> Option<ModelInfo> {
        self.get(key).map(|record| record.info())
    }

    // ------------------------------------------------------------------
    // Inference
    // ------------------------------------------------------------------

    /// One decision per state, in input order.
    pub async fn infer_batch<S>(
        &self,
        states: &[S],
        archetypes: &[Archetype],
        model_type: ModelType,
    ) -> Result<Vec<Decision>>
    where
        S: AsRef<[f32]> + Sync,
    {
        if states.len() != archetypes.len() {
            return Err(EngineError::BatchMismatch {
                states: states.len(),
                archetypes: archetypes.len(),
            });
        }
        let rows = states
            .iter()
            .zip(archetypes)
            .map(|(state, &archetype)| (ModelKey::new(archetype, model_type), state.as_ref().to_vec()))
            .collect();
        Ok(self.infer_rows(rows).await)
    }

    /// Raw output for a single state, going through the L3 tier.
    pub async fn model_output(&self, state: &[f32], archetype: Archetype, model_type: ModelType) -> Option<Tensor> {
        let key = ModelKey::new(archetype, model_type);
        let record = self.get(key)?;

        let cache_key = self.cache.as_ref().filter(|c| c.is_enabled()).map(|cache| {
            TieredCache::model_output_key(archetype, model_type, &cache.state_hash(state))
        });
        if let (Some(cache), Some(cache_key)) = (&self.cache, &cache_key)
            && let Some(hit) = cache.check_model_outputs(std::slice::from_ref(cache_key)).await.pop().flatten()
        {
            return Some(hit);
        }

        let input = Tensor::new(vec![1, state.len()], state.to_vec()).ok()?;
        let session = record.session.clone();
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || session.run(&input))
            .await
            .map_err(|e| BackendError::Execution(e.to_string()))
            .and_then(|r| r);
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(output) => {
                self.report_success(key, 1, latency_ms);
                if let (Some(cache), Some(cache_key)) = (&self.cache, &cache_key)
                    && let Some(_gate) = self.l3_gate_for(&record).await
                {
                    cache.store_model_output(cache_key, &output, None).await;
                }
                Some(output)
            }
            Err(e) => {
                self.report_failure(key, &e);
                None
            }
        }
    }

    /// Runs `(model key, input row)` pairs grouped by key, one model call per
    /// group, and returns decisions in input order.
    pub(crate) async fn infer_rows(&self, rows: Vec<(ModelKey, Vec<f32>)>) -> Vec<Decision> {
        let keys: Vec<ModelKey> = rows.iter().map(|(key, _)| *key).collect();
        let mut out: Vec<Option<Decision>> = vec![None; rows.len()];
        self.metrics.record_batch_size(rows.len());

        let mut groups: BTreeMap<ModelKey, Vec<(usize, Vec<f32>)>> = BTreeMap::new();
        for (index, (key, row)) in rows.into_iter().enumerate() {
            groups.entry(key).or_default().push((index, row));
        }

        let mut tasks = JoinSet::new();
        for (key, members) in groups {
            let Some(record) = self.get(key) else {
                warn!(target: "mob_ai::engine", %key, rows = members.len(), "no model loaded, answering with safe default");
                self.metrics.record_missing_model(key);
                for (index, _) in members {
                    out[index] = Some(Decision::safe_default(key, DecisionOrigin::MissingModel));
                }
                continue;
            };

            let mut indices = Vec::with_capacity(members.len());
            let mut pending = Vec::with_capacity(members.len());
            let mut cache_keys = Vec::with_capacity(members.len());

            match self.cache.as_ref().filter(|c| c.is_enabled()) {
                Some(cache) => {
                    let lookup: Vec<String> = members
                        .iter()
                        .map(|(_, row)| {
                            TieredCache::model_output_key(key.archetype, key.model_type, &cache.state_hash(row))
                        })
                        .collect();
                    let hits = cache.check_model_outputs(&lookup).await;
                    for (((index, row), cache_key), hit) in members.into_iter().zip(lookup).zip(hits) {
                        match hit.and_then(|t| t.row(0).map(<[f32]>::to_vec)) {
                            Some(scores) => {
                                out[index] =
                                    Some(Decision::from_output(key, scores, DecisionOrigin::CachedOutput));
                            }
                            None => {
                                indices.push(index);
                                pending.push(row);
                                cache_keys.push(Some(cache_key));
                            }
                        }
                    }
                }
                None => {
                    for (index, row) in members {
                        indices.push(index);
                        pending.push(row);
                        cache_keys.push(None);
                    }
                }
            }

            if pending.is_empty() {
                continue;
            }

            tasks.spawn_blocking(move || {
                let started = Instant::now();
                let result = Tensor::from_rows(&pending)
                    .map_err(|e| BackendError::Execution(e.to_string()))
                    .and_then(|input| record.session.run(&input));
                GroupRun {
                    key,
                    record,
                    indices,
                    cache_keys,
                    result,
                    latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let run = match joined {
                Ok(run) => run,
                Err(e) => {
                    // Rows of a panicked group stay unanswered and are
                    // filled in below.
                    error!(target: "mob_ai::engine", error = %e, "model task aborted");
                    self.fallback.record_error(&e);
                    self.metrics.record_inference_error("task_aborted");
                    continue;
                }
            };
            self.finish_group(run, &mut out).await;
        }

        out.into_iter()
            .zip(keys)
            .map(|(decision, key)| {
                decision.unwrap_or_else(|| Decision::safe_default(key, DecisionOrigin::GroupFailed))
            })
            .collect()
    }

    async fn finish_group(&self, run: GroupRun, out: &mut [Option<Decision>]) {
        let GroupRun {
            key,
            record,
            indices,
            cache_keys,
            result,
            latency_ms,
        } = run;

        let output = match result {
            Ok(output) if output.batch_size() == indices.len() => output,
            Ok(output) => {
                let e = BackendError::Execution(format!(
                    "model returned {} rows for a batch of {}",
                    output.batch_size(),
                    indices.len()
                ));
                self.fail_group(key, &indices, &e, out);
                return;
            }
            Err(e) => {
                self.fail_group(key, &indices, &e, out);
                return;
            }
        };

        self.report_success(key, indices.len(), latency_ms);

        let cache = match &self.cache {
            Some(cache) if cache_keys.iter().any(Option::is_some) => Some(cache),
            _ => None,
        };
        let gate = match cache {
            Some(_) => self.l3_gate_for(&record).await,
            None => None,
        };
        if cache.is_some() && gate.is_none() {
            debug!(target: "mob_ai::engine", %key, "model replaced mid-run, outputs not cached");
        }

        for (position, (index, cache_key)) in indices.into_iter().zip(cache_keys).enumerate() {
            let scores = output.row(position).map(<[f32]>::to_vec).unwrap_or_default();
            if let (Some(cache), Some(_), Some(cache_key)) = (cache, &gate, cache_key)
                && let Ok(row) = Tensor::new(vec![1, scores.len()], scores.clone())
            {
                cache.store_model_output(&cache_key, &row, None).await;
            }
            out[index] = Some(Decision::from_output(key, scores, DecisionOrigin::Model));
        }
    }

    fn fail_group(&self, key: ModelKey, indices: &[usize], e: &BackendError, out: &mut [Option<Decision>]) {
        self.report_failure(key, e);
        for &index in indices {
            out[index] = Some(Decision::safe_default(key, DecisionOrigin::GroupFailed));
        }
    }

    fn report_success(&self, key: ModelKey, rows: usize, latency_ms: f64) {
        // A slow success only feeds the latency window. It neither resets
        // the error streak nor counts as an error; escalation happens past
        // 1.5x the ceiling inside `record_latency`.
        if latency_ms > self.fallback.latency_ceiling_ms() {
            self.fallback.record_latency(latency_ms);
        } else {
            self.fallback.record_success(latency_ms);
        }
        self.metrics
            .record_inference_latency(key.archetype, key.model_type, false, latency_ms);

        self.rows_inferred.fetch_add(rows as u64, Ordering::Relaxed);
        self.model_calls.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add((latency_ms * 1000.0) as u64, Ordering::Relaxed);
        self.latencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.model_type)
            .or_insert_with(|| RollingWindow::new(self.config.stats_window))
            .push(latency_ms);
    }

    fn report_failure(&self, key: ModelKey, e: &BackendError) {
        error!(target: "mob_ai::engine", %key, error = %e, "inference failed");
        self.fallback.record_error(e);
        self.metrics.record_inference_error(match e {
            BackendError::InputShape { .. } => "input_shape",
            _ => "execution",
        });
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Mean latency per model call.
    pub fn avg_latency_ms(&self) -> f64 {
        let calls = self.model_calls.load(Ordering::Relaxed);
        if calls == 0 {
            return 0.0;
        }
        self.total_latency_us.load(Ordering::Relaxed) as f64 / 1000.0 / calls as f64
    }

    pub fn latency_stats(&self) -> BTreeMap<ModelType, LatencySummary> {
        self.latencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(model_type, window)| (*model_type, window.summary()))
            .collect()
    }

    pub fn statistics(&self) -> EngineStatistics {
        EngineStatistics {
            models_loaded: self.loaded_models().len(),
            total_inferences: self.rows_inferred.load(Ordering::Relaxed),
            model_calls: self.model_calls.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            device: self.device().to_string(),
            backends: self.registry.names(),
            model_latencies: self
                .latency_stats()
                .into_iter()
                .map(|(model_type, summary)| (model_type.to_string(), summary))
                .collect(),
        }
    }

    /// `device_available` is the latest GPU probe result; it only matters
    /// while the engine prefers a GPU device.
    pub fn health_check(&self, device_available: bool) -> EngineHealth {
        let models_loaded = self.loaded_models().len();
        let avg_latency_ms = self.avg_latency_ms();
        let device = self.device();

        let (status, message) = if models_loaded == 0 {
            (EngineHealthStatus::Critical, "no models loaded".to_string())
        } else if device.uses_gpu() && !device_available {
            (EngineHealthStatus::Degraded, "GPU not available".to_string())
        } else if avg_latency_ms > 30.0 {
            (
                EngineHealthStatus::Degraded,
                format!("high latency ({avg_latency_ms:.1}ms)"),
            )
        } else {
            (EngineHealthStatus::Healthy, "all systems operational".to_string())
        };

        EngineHealth {
            status,
            message,
            models_loaded,
            device_available,
            avg_latency_ms,
            inference_count: self.rows_inferred.load(Ordering::Relaxed),
        }
    }
}

/// Input width assumed when an artifact declares a dynamic feature axis.
fn default_input_width(model_type: ModelType) -> usize {
    if model_type.takes_signal_input() {
        STATE_DIM + SIGNAL_DIM
    } else {
        STATE_DIM
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FallbackConfig;

    #[test]
    fn decision_from_scores_and_discrete_outputs() {
        let key = ModelKey::new(Archetype::Mage, ModelType::CombatDqn);

        let scored = Decision::from_output(key, vec![0.0, 3.0, 0.0], DecisionOrigin::Model);
        assert_eq!(scored.action, ActionId::ATTACK);
        assert!(scored.confidence > 0.8);

        let discrete = Decision::from_output(key, vec![9.0], DecisionOrigin::Model);
        assert_eq!(discrete.action, ActionId::FLEE);
        assert_eq!(discrete.confidence, 1.0);

        let out_of_range = Decision::from_output(key, vec![42.0], DecisionOrigin::Model);
        assert_eq!(out_of_range.action, ActionId::IDLE);

        let empty = Decision::from_output(key, vec![], DecisionOrigin::Model);
        assert_eq!(empty.action, ActionId::IDLE);
    }

    #[tokio::test]
    async fn empty_engine_is_critical_and_answers_idle() {
        let fallback = Arc::new(FallbackController::new(FallbackConfig::default(), MetricsSink::new()));
        let engine = InferenceEngine::new(EngineConfig::default(), fallback, MetricsSink::new());

        assert_eq!(engine.health_check(true).status, EngineHealthStatus::Critical);

        let states = vec![vec![0.0; STATE_DIM]; 2];
        let decisions = engine
            .infer_batch(&states, &[Archetype::Tank, Archetype::Mage], ModelType::CombatDqn)
            .await
            .unwrap();
        assert!(decisions.iter().all(|d| d.action == ActionId::IDLE));
        assert!(decisions.iter().all(|d| d.origin == DecisionOrigin::MissingModel));

        assert!(matches!(
            engine.infer_batch(&states, &[Archetype::Tank], ModelType::CombatDqn).await,
            Err(EngineError::BatchMismatch { .. })
        ));
    }
}
