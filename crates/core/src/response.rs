//! Decisions written back to the response store.

use std::collections::BTreeMap;

use crate::action::{ActionId, ActionType};
use crate::level::FallbackLevel;
use crate::request::{InferenceRequest, MonsterId, RequestId};

/// Structured parameters attached to an action.
pub type ActionParams = BTreeMap<String, f32>;

/// Raw per-model outputs kept for auditing, keyed by model type.
pub type ModelOutputs = BTreeMap<String, Vec<f32>>;

/// Coordination tag written alongside pack-coordinated actions.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoordinationTag {
    pub coordinated: bool,
    pub score: f32,
    pub bonus: f32,
}

impl CoordinationTag {
    /// Label stored in `ai_responses.coordination_action`.
    pub fn label(&self) -> &'static str {
        if self.coordinated {
            "coordinated"
        } else {
            "independent"
        }
    }
}

/// Result of processing one request. Write-once.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InferenceResponse {
    pub request_id: RequestId,
    pub monster_id: MonsterId,
    pub action_type: ActionType,
    pub action_id: ActionId,
    pub action_params: ActionParams,
    pub model_outputs: ModelOutputs,
    pub confidence: f32,
    pub fusion_weights: BTreeMap<String, f32>,
    pub coordination: Option<CoordinationTag>,
    pub target_monster_id: Option<MonsterId>,
    pub inference_latency_ms: f32,
    pub cache_used: bool,
    pub fallback_level: FallbackLevel,
}

impl InferenceResponse {
    pub fn new(
        request: &InferenceRequest,
        action_type: ActionType,
        action_id: ActionId,
        confidence: f32,
        fallback_level: FallbackLevel,
    ) -> Self {
        Self {
            request_id: request.request_id,
            monster_id: request.monster_id,
            action_type,
            action_id,
            action_params: ActionParams::new(),
            model_outputs: ModelOutputs::new(),
            confidence,
            fusion_weights: BTreeMap::new(),
            coordination: None,
            target_monster_id: None,
            inference_latency_ms: 0.0,
            cache_used: false,
            fallback_level,
        }
    }

    /// Sentinel answer used when inference failed outright.
    pub fn error_fallback(request: &InferenceRequest) -> Self {
        Self::new(
            request,
            ActionType::ErrorFallback,
            ActionId::TRADITIONAL_AI,
            0.0,
            FallbackLevel::TraditionalAi,
        )
    }

    pub fn with_latency_ms(mut self, latency_ms: f32) -> Self {
        self.inference_latency_ms = latency_ms;
        self
    }

    pub fn with_cache_used(mut self, cache_used: bool) -> Self {
        self.cache_used = cache_used;
        self
    }

    pub fn with_model_output(mut self, model: impl Into<String>, output: Vec<f32>) -> Self {
        self.model_outputs.insert(model.into(), output);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: f32) -> Self {
        self.action_params.insert(key.into(), value);
        self
    }

    pub fn with_coordination(mut self, tag: CoordinationTag) -> Self {
        self.coordination = Some(tag);
        self
    }

    pub fn with_target(mut self, target: Option<MonsterId>) -> Self {
        self.target_monster_id = target;
        self
    }

    /// Text for the `coordination_action` column.
    pub fn coordination_action(&self) -> Option<&'static str> {
        self.coordination.as_ref().map(CoordinationTag::label)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::archetype::Archetype;
    use crate::request::{Position, STATE_DIM};

    fn request() -> InferenceRequest {
        InferenceRequest {
            request_id: 42,
            monster_id: 9,
            mob_id: 1002,
            archetype: Archetype::Tank,
            state: vec![0.0; STATE_DIM],
            spatial_grid: None,
            combat_history: None,
            pack_leader_id: None,
            pack_member_ids: Vec::new(),
            map_id: 1,
            position: Position::default(),
            hp_ratio: 1.0,
            sp_ratio: 1.0,
            created_at: Utc::now(),
            priority: 0,
        }
    }

    #[test]
    fn error_fallback_carries_sentinel_and_worst_level() {
        let response = InferenceResponse::error_fallback(&request());
        assert_eq!(response.request_id, 42);
        assert_eq!(response.action_id, ActionId::TRADITIONAL_AI);
        assert_eq!(response.action_type, ActionType::ErrorFallback);
        assert_eq!(response.fallback_level, FallbackLevel::TraditionalAi);
        assert_eq!(response.coordination_action(), None);
    }

    #[test]
    fn builder_helpers_fill_optional_columns() {
        let response = InferenceResponse::new(
            &request(),
            ActionType::Combat,
            ActionId::ATTACK,
            0.9,
            FallbackLevel::GpuFp16,
        )
        .with_cache_used(true)
        .with_model_output("combat_dqn", vec![0.1, 0.9])
        .with_coordination(CoordinationTag {
            coordinated: true,
            score: 0.8,
            bonus: 0.8,
        })
        .with_target(Some(11));

        assert!(response.cache_used);
        assert_eq!(response.model_outputs["combat_dqn"], vec![0.1, 0.9]);
        assert_eq!(response.coordination_action(), Some("coordinated"));
        assert_eq!(response.target_monster_id, Some(11));
    }
}
