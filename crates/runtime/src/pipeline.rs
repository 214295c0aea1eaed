//! Per-batch decision path: working memory, action cache, fallback level,
//! then model inference (pack groups jointly, everyone else batched).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use mob_ai_core::{
    ActionId, ActionType, CoordinationTag, FallbackLevel, InferenceRequest, InferenceResponse,
    ModelType, MonsterId,
};

use crate::cache::TieredCache;
use crate::coordination::{PackGraph, PackMonster, SignalSource};
use crate::engine::{Decision, DecisionOrigin, InferenceEngine};
use crate::fallback::FallbackController;
use crate::metrics::{MetricsSink, RequestOutcome};

/// Confidence reported for rule-table answers.
const RULE_CONFIDENCE: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Minimum coordination score for a pack to be tagged coordinated.
    pub coordination_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            coordination_threshold: 0.5,
        }
    }
}

pub struct DecisionPipeline {
    engine: Arc<InferenceEngine>,
    cache: Option<Arc<TieredCache>>,
    fallback: Arc<FallbackController>,
    signals: Arc<dyn SignalSource>,
    graph: Arc<dyn PackGraph>,
    metrics: MetricsSink,
    config: PipelineConfig,
}

impl DecisionPipeline {
    pub fn new(
        engine: Arc<InferenceEngine>,
        cache: Option<Arc<TieredCache>>,
        fallback: Arc<FallbackController>,
        signals: Arc<dyn SignalSource>,
        graph: Arc<dyn PackGraph>,
        metrics: MetricsSink,
        config: PipelineConfig,
    ) -> Self {
        Self {
            engine,
            cache,
            fallback,
            signals,
            graph,
            metrics,
            config,
        }
    }

    fn primary_model(&self) -> ModelType {
        self.engine.config().primary_model
    }

    /// One response per request, in request order.
    pub async fn process(&self, requests: &[InferenceRequest]) -> Vec<InferenceResponse> {
        let started = Instant::now();
        let level = self.fallback.current_level();
        let primary = self.primary_model();
        let mut out: Vec<Option<InferenceResponse>> = vec![None; requests.len()];

        if let Some(cache) = &self.cache {
            for request in requests {
                cache.record_state(request.monster_id, &request.state);
            }
        }

        let mut pending = Vec::with_capacity(requests.len());
        for (index, request) in requests.iter().enumerate() {
            let hit = match &self.cache {
                Some(cache) => cache.check_action(request.monster_id, &request.state).await,
                None => None,
            };
            match hit {
                Some((action, confidence)) => {
                    let latency_ms = elapsed_ms(started);
                    self.metrics
                        .record_inference_latency(request.archetype, primary, true, latency_ms);
                    self.metrics
                        .record_request(request.archetype, primary, RequestOutcome::Success);
                    out[index] = Some(
                        InferenceResponse::new(request, ActionType::Combat, action, confidence, level)
                            .with_cache_used(true)
                            .with_latency_ms(latency_ms as f32),
                    );
                }
                None => pending.push(index),
            }
        }

        if self.fallback.should_skip_model_inference() {
            for index in pending {
                out[index] = Some(self.level_answer(&requests[index], level));
            }
        } else {
            self.infer(requests, pending, level, &mut out).await;
        }

        let latency_ms = elapsed_ms(started) as f32;
        out.into_iter()
            .zip(requests)
            .map(|(response, request)| {
                response.unwrap_or_else(|| {
                    self.metrics
                        .record_request(request.archetype, primary, RequestOutcome::Error);
                    InferenceResponse::error_fallback(request)
                })
            })
            .map(|response| {
                if response.inference_latency_ms == 0.0 {
                    response.with_latency_ms(latency_ms)
                } else {
                    response
                }
            })
            .collect()
    }

    /// Answer at RULE_BASED_ML or TRADITIONAL_AI.
    fn level_answer(&self, request: &InferenceRequest, level: FallbackLevel) -> InferenceResponse {
        let action = self
            .fallback
            .action_for_current_level(&request.state)
            .unwrap_or(ActionId::TRADITIONAL_AI);
        let confidence = if action.is_traditional_ai() {
            0.0
        } else {
            RULE_CONFIDENCE
        };
        self.metrics
            .record_request(request.archetype, self.primary_model(), RequestOutcome::Fallback);
        InferenceResponse::new(request, ActionType::Fallback, action, confidence, level)
    }

    async fn infer(
        &self,
        requests: &[InferenceRequest],
        pending: Vec<usize>,
        level: FallbackLevel,
        out: &mut [Option<InferenceResponse>],
    ) {
        let mut packs: BTreeMap<MonsterId, Vec<usize>> = BTreeMap::new();
        let mut solo = Vec::new();
        for index in pending {
            let request = &requests[index];
            if request.is_pack_member() {
                packs.entry(request.pack_key()).or_default().push(index);
            } else {
                solo.push(index);
            }
        }
        // A lone pack member has nobody to coordinate with.
        packs.retain(|_, members| {
            if members.len() < 2 {
                solo.append(members);
                false
            } else {
                true
            }
        });
        solo.sort_unstable();

        if !solo.is_empty() {
            let states: Vec<&[f32]> = solo.iter().map(|&i| requests[i].state.as_slice()).collect();
            let archetypes: Vec<_> = solo.iter().map(|&i| requests[i].archetype).collect();
            match self
                .engine
                .infer_batch(&states, &archetypes, self.primary_model())
                .await
            {
                Ok(decisions) => {
                    for (index, decision) in solo.into_iter().zip(decisions) {
                        out[index] = Some(self.respond(&requests[index], decision, None, level).await);
                    }
                }
                Err(e) => {
                    error!(target: "mob_ai::worker", error = %e, "batch inference failed");
                }
            }
        }

        for (pack_key, members) in packs {
            let monsters: Vec<PackMonster> = members.iter().map(|&i| PackMonster::from(&requests[i])).collect();
            let decisions = self
                .engine
                .infer_pack_coordination(
                    &monsters,
                    self.signals.as_ref(),
                    self.graph.as_ref(),
                    self.config.coordination_threshold,
                )
                .await;
            debug!(target: "mob_ai::worker", pack_key, size = members.len(), "pack decided");
            for (index, pack) in members.into_iter().zip(decisions) {
                out[index] = Some(
                    self.respond(&requests[index], pack.decision, pack.coordination, level)
                        .await,
                );
            }
        }
    }

    async fn respond(
        &self,
        request: &InferenceRequest,
        decision: Decision,
        coordination: Option<CoordinationTag>,
        level: FallbackLevel,
    ) -> InferenceResponse {
        let model_type = decision.model.model_type;
        match decision.origin {
            DecisionOrigin::Model | DecisionOrigin::CachedOutput => {
                self.metrics
                    .record_request(request.archetype, model_type, RequestOutcome::Success);
                if let Some(cache) = &self.cache {
                    cache
                        .update_action(
                            request.monster_id,
                            &request.state,
                            decision.action,
                            decision.confidence,
                            None,
                        )
                        .await;
                }

                let mut response = InferenceResponse::new(
                    request,
                    ActionType::Combat,
                    decision.action,
                    decision.confidence,
                    level,
                )
                .with_cache_used(decision.origin == DecisionOrigin::CachedOutput);
                if let Some(scores) = decision.scores {
                    response = response.with_model_output(model_type.as_str(), scores);
                }
                if let Some(tag) = coordination {
                    if tag.coordinated {
                        response = response
                            .with_param("coordination_bonus", tag.bonus)
                            .with_target(request.pack_leader_id);
                    }
                    response = response.with_coordination(tag);
                }
                response
            }
            DecisionOrigin::MissingModel => {
                self.metrics
                    .record_request(request.archetype, model_type, RequestOutcome::Fallback);
                InferenceResponse::new(
                    request,
                    ActionType::Fallback,
                    decision.action,
                    decision.confidence,
                    level,
                )
            }
            DecisionOrigin::GroupFailed => {
                self.metrics
                    .record_request(request.archetype, model_type, RequestOutcome::Error);
                InferenceResponse::error_fallback(request)
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
