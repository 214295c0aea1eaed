//! Pack-coordination collaborators.
//!
//! The engine consumes two external services during a coordination pass:
//! a [`PackGraph`] that resolves who belongs to a pack and in which role, and
//! a [`SignalSource`] that summarizes the signals each monster has received
//! into a fixed [`SIGNAL_DIM`]-wide vector. In-memory implementations back
//! tests and single-node deployments.

mod graph;
mod signals;

pub use graph::InMemoryPackGraph;
pub use signals::{Formation, InMemorySignalBoard, Signal, SignalKind, aggregate_signals};

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use mob_ai_core::{Archetype, InferenceRequest, MonsterId};

/// Width of a per-monster signal vector.
pub const SIGNAL_DIM: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PackRole {
    Leader,
    Follower,
    Member,
    Independent,
}

/// Pack structure as seen from one representative monster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackStructure {
    pub leader_id: MonsterId,
    pub follower_ids: Vec<MonsterId>,
    pub teammate_ids: Vec<MonsterId>,
    /// Role of the representative monster.
    pub role: PackRole,
}

impl PackStructure {
    /// Leader, followers and teammates, deduplicated.
    pub fn members(&self) -> BTreeSet<MonsterId> {
        std::iter::once(self.leader_id)
            .chain(self.follower_ids.iter().copied())
            .chain(self.teammate_ids.iter().copied())
            .collect()
    }

    pub fn role_of(&self, monster_id: MonsterId) -> Option<PackRole> {
        if monster_id == self.leader_id {
            Some(PackRole::Leader)
        } else if self.follower_ids.contains(&monster_id) {
            Some(PackRole::Follower)
        } else if self.teammate_ids.contains(&monster_id) {
            Some(PackRole::Member)
        } else {
            None
        }
    }
}

/// Pack membership lookup.
#[async_trait]
pub trait PackGraph: Send + Sync {
    /// Structure of the pack `representative` belongs to, or `None` when the
    /// monster is unknown to the graph.
    async fn pack_structure(&self, representative: MonsterId) -> Option<PackStructure>;
}

/// Per-monster signal summaries.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Signal vectors for `monster_ids`. Monsters without signals may be
    /// omitted; callers treat them as all-zero vectors.
    async fn signal_vectors(&self, monster_ids: &[MonsterId]) -> HashMap<MonsterId, Vec<f32>>;
}

/// One monster's input to a coordination pass.
#[derive(Clone, Debug, PartialEq)]
pub struct PackMonster {
    pub monster_id: MonsterId,
    pub archetype: Archetype,
    pub state: Vec<f32>,
}

impl From<&InferenceRequest> for PackMonster {
    fn from(request: &InferenceRequest) -> Self {
        Self {
            monster_id: request.monster_id,
            archetype: request.archetype,
            state: request.state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_and_roles() {
        let pack = PackStructure {
            leader_id: 1,
            follower_ids: vec![2, 3],
            teammate_ids: vec![3, 4],
            role: PackRole::Follower,
        };
        assert_eq!(pack.members().into_iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(pack.role_of(1), Some(PackRole::Leader));
        assert_eq!(pack.role_of(3), Some(PackRole::Follower));
        assert_eq!(pack.role_of(4), Some(PackRole::Member));
        assert_eq!(pack.role_of(9), None);
    }
}
