//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use mob_ai_core::{
    ActionId, Archetype, DevicePreference, InferenceRequest, ModelType, MonsterId, RequestId,
    RequestRow, STATE_DIM,
};
use mob_ai_runtime::{
    EngineConfig, FallbackConfig, FallbackController, InferenceEngine, MetricsSink,
};

/// Output width of every policy fixture.
pub const ACTIONS: usize = ActionId::COUNT;

/// Bias vector whose arg-max is `action`.
pub fn preferring(action: ActionId, width: usize) -> Vec<f32> {
    let mut bias = vec![0.0; width];
    if let Some(slot) = bias.get_mut(action.value() as usize) {
        *slot = 4.0;
    }
    bias
}

/// Writes a single-layer dense policy that ignores its input and always
/// scores `bias`.
pub fn write_policy_at(path: &Path, input_dim: usize, bias: &[f32]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let policy = json!({
        "input_dim": input_dim,
        "layers": [{
            "weights": vec![vec![0.0_f32; input_dim]; bias.len()],
            "bias": bias,
            "activation": "linear",
        }],
    });
    std::fs::write(path, serde_json::to_vec(&policy).unwrap()).unwrap();
}

/// Writes `{model_dir}/{archetype}/{model_type}.json` choosing `action`.
pub fn write_policy(model_dir: &Path, archetype: Archetype, model_type: ModelType, action: ActionId) -> PathBuf {
    let path = model_dir
        .join(archetype.as_str())
        .join(format!("{}.json", model_type.as_str()));
    write_policy_at(&path, STATE_DIM, &preferring(action, ACTIONS));
    path
}

pub fn engine_config(model_dir: &Path) -> EngineConfig {
    EngineConfig {
        model_dir: model_dir.to_path_buf(),
        device: DevicePreference::CpuInt8,
        ..EngineConfig::default()
    }
}

pub fn engine(model_dir: &Path) -> (Arc<InferenceEngine>, Arc<FallbackController>) {
    let metrics = MetricsSink::new();
    let fallback = Arc::new(FallbackController::new(FallbackConfig::default(), metrics.clone()));
    let engine = InferenceEngine::new(engine_config(model_dir), fallback.clone(), metrics);
    (Arc::new(engine), fallback)
}

/// State vector unique to `monster_id` so cache keys never collide across
/// monsters.
pub fn state_for(monster_id: MonsterId) -> Vec<f32> {
    let mut state = vec![0.5; STATE_DIM];
    state[0] = (monster_id % 100) as f32 / 10.0;
    state[1] = (monster_id / 100 % 100) as f32 / 10.0;
    state
}

pub fn row(request_id: RequestId, monster_id: MonsterId, archetype: Archetype) -> RequestRow {
    RequestRow {
        request_id,
        monster_id,
        mob_id: 1002,
        archetype: archetype.as_str().to_string(),
        state_vector: state_for(monster_id),
        spatial_grid: None,
        combat_history: None,
        pack_leader_id: None,
        pack_member_ids: None,
        map_id: 1,
        position_x: 10,
        position_y: 20,
        hp_ratio: 0.8,
        sp_ratio: 0.6,
        created_at: Utc::now(),
        priority: 0,
    }
}

pub fn request(request_id: RequestId, monster_id: MonsterId, archetype: Archetype) -> InferenceRequest {
    InferenceRequest::try_from(row(request_id, monster_id, archetype)).unwrap()
}

/// Pack follower pointing at `leader`.
pub fn follower(request_id: RequestId, monster_id: MonsterId, archetype: Archetype, leader: MonsterId) -> InferenceRequest {
    let mut row = row(request_id, monster_id, archetype);
    row.pack_leader_id = Some(leader);
    InferenceRequest::try_from(row).unwrap()
}

/// Pack leader listing its `members`.
pub fn leader(request_id: RequestId, monster_id: MonsterId, archetype: Archetype, members: &[MonsterId]) -> InferenceRequest {
    let mut row = row(request_id, monster_id, archetype);
    row.pack_member_ids = Some(members.to_vec());
    InferenceRequest::try_from(row).unwrap()
}
