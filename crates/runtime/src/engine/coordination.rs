//! Joint inference for monsters of the same pack.

use std::collections::BTreeSet;

use tracing::debug;

use mob_ai_core::{CoordinationTag, ModelKey, ModelType, MonsterId};

use super::{Decision, InferenceEngine};
use crate::coordination::{PackGraph, PackMonster, SIGNAL_DIM, SignalSource};

/// One monster's answer from a coordination pass.
#[derive(Clone, Debug, PartialEq)]
pub struct PackDecision {
    pub monster_id: MonsterId,
    pub decision: Decision,
    /// `None` when the pass fell back to individual inference.
    pub coordination: Option<CoordinationTag>,
}

/// Weighted coordination score in `[0, 1]`:
/// 40% signal coverage, 30% pack coverage, 20% leader presence and 10%
/// action diversity.
pub fn coordination_score(
    batch_len: usize,
    signalled: usize,
    pack_size: usize,
    leader_present: bool,
    distinct_actions: usize,
) -> f32 {
    if batch_len == 0 {
        return 0.0;
    }
    let n = batch_len as f32;
    let signal = signalled as f32 / n;
    let coverage = (n / pack_size.max(1) as f32).min(1.0);
    let leader = if leader_present { 1.0 } else { 0.0 };
    let diversity = distinct_actions as f32 / n;
    (0.4 * signal + 0.3 * coverage + 0.2 * leader + 0.1 * diversity).clamp(0.0, 1.0)
}

impl InferenceEngine {
    /// Decides for a pack jointly. Falls back to individual inference for
    /// every monster when the batch is a singleton, the pack is unknown, or
    /// the batch contains monsters outside the resolved pack.
    pub async fn infer_pack_coordination(
        &self,
        monsters: &[PackMonster],
        signals: &dyn SignalSource,
        graph: &dyn PackGraph,
        threshold: f32,
    ) -> Vec<PackDecision> {
        let Some(first) = monsters.first() else {
            return Vec::new();
        };
        if monsters.len() < 2 {
            return self.infer_individually(monsters).await;
        }

        let Some(pack) = graph.pack_structure(first.monster_id).await else {
            debug!(target: "mob_ai::engine", representative = first.monster_id, "no pack structure, deciding individually");
            return self.infer_individually(monsters).await;
        };
        let members = pack.members();
        if let Some(outsider) = monsters.iter().find(|m| !members.contains(&m.monster_id)) {
            debug!(
                target: "mob_ai::engine",
                leader = pack.leader_id,
                outsider = outsider.monster_id,
                "batch is not a subset of the pack, deciding individually"
            );
            return self.infer_individually(monsters).await;
        }

        let ids: Vec<MonsterId> = monsters.iter().map(|m| m.monster_id).collect();
        let mut vectors = signals.signal_vectors(&ids).await;

        let mut signalled = 0;
        let rows: Vec<(ModelKey, Vec<f32>)> = monsters
            .iter()
            .map(|monster| {
                let signal = vectors
                    .remove(&monster.monster_id)
                    .map(|mut v| {
                        v.resize(SIGNAL_DIM, 0.0);
                        v
                    })
                    .unwrap_or_else(|| vec![0.0; SIGNAL_DIM]);
                if signal.iter().any(|v| *v != 0.0) {
                    signalled += 1;
                }

                let joint = ModelKey::new(monster.archetype, ModelType::PackCoordination);
                if self.is_model_loaded(joint) {
                    let mut input = monster.state.clone();
                    input.extend_from_slice(&signal);
                    (joint, input)
                } else {
                    (
                        ModelKey::new(monster.archetype, ModelType::TeamCoordination),
                        monster.state.clone(),
                    )
                }
            })
            .collect();

        let decisions = self.infer_rows(rows).await;

        let distinct_actions = decisions.iter().map(|d| d.action).collect::<BTreeSet<_>>().len();
        let leader_present = ids.contains(&pack.leader_id);
        let score = coordination_score(
            monsters.len(),
            signalled,
            members.len(),
            leader_present,
            distinct_actions,
        );
        let tag = if score >= threshold {
            CoordinationTag {
                coordinated: true,
                score,
                bonus: score,
            }
        } else {
            CoordinationTag {
                coordinated: false,
                score,
                bonus: 0.0,
            }
        };
        debug!(
            target: "mob_ai::engine",
            leader = pack.leader_id,
            size = monsters.len(),
            score,
            coordinated = tag.coordinated,
            "pack coordination pass"
        );

        ids.into_iter()
            .zip(decisions)
            .map(|(monster_id, decision)| PackDecision {
                monster_id,
                decision,
                coordination: Some(tag.clone()),
            })
            .collect()
    }

    async fn infer_individually(&self, monsters: &[PackMonster]) -> Vec<PackDecision> {
        let model_type = self.config.primary_model;
        let rows = monsters
            .iter()
            .map(|m| (ModelKey::new(m.archetype, model_type), m.state.clone()))
            .collect();
        self.infer_rows(rows)
            .await
            .into_iter()
            .zip(monsters)
            .map(|(decision, monster)| PackDecision {
                monster_id: monster.monster_id,
                decision,
                coordination: None,
            })
            .collect()
    }
}
