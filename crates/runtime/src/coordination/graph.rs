use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use mob_ai_core::MonsterId;

use super::{PackGraph, PackRole, PackStructure};

#[derive(Debug, Default)]
struct Graph {
    /// follower → leader
    leads: HashMap<MonsterId, MonsterId>,
    /// monster → team id
    teams: HashMap<MonsterId, u64>,
}

/// Process-local pack graph with leader and team edges.
#[derive(Debug, Default)]
pub struct InMemoryPackGraph {
    graph: RwLock<Graph>,
}

impl InMemoryPackGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_leader(&self, follower: MonsterId, leader: MonsterId) {
        self.write().leads.insert(follower, leader);
    }

    pub fn join_team(&self, monster: MonsterId, team: u64) {
        self.write().teams.insert(monster, team);
    }

    /// Registers `leader` leading every monster in `followers`.
    pub fn add_pack(&self, leader: MonsterId, followers: &[MonsterId]) {
        let mut graph = self.write();
        for &follower in followers {
            graph.leads.insert(follower, leader);
        }
    }

    pub fn remove(&self, monster: MonsterId) {
        let mut graph = self.write();
        graph.leads.remove(&monster);
        graph.leads.retain(|_, leader| *leader != monster);
        graph.teams.remove(&monster);
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Graph> {
        self.graph.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PackGraph for InMemoryPackGraph {
    async fn pack_structure(&self, representative: MonsterId) -> Option<PackStructure> {
        let graph = self.graph.read().unwrap_or_else(|e| e.into_inner());

        let direct_leader = graph.leads.get(&representative).copied();
        let leads_others = graph.leads.values().any(|&l| l == representative);
        let team = graph.teams.get(&representative).copied();
        if direct_leader.is_none() && !leads_others && team.is_none() {
            return None;
        }

        let leader_id = direct_leader.unwrap_or(representative);
        // Followers up to two hops below the pack leader.
        let mut followers = BTreeSet::new();
        let mut frontier = vec![leader_id];
        for _ in 0..2 {
            let next: Vec<MonsterId> = graph
                .leads
                .iter()
                .filter(|(_, leader)| frontier.contains(leader))
                .map(|(&follower, _)| follower)
                .filter(|&f| f != leader_id && followers.insert(f))
                .collect();
            frontier = next;
        }

        let teammate_ids = team
            .map(|team| {
                let mut mates: Vec<MonsterId> = graph
                    .teams
                    .iter()
                    .filter(|&(&m, &t)| t == team && m != representative)
                    .map(|(&m, _)| m)
                    .collect();
                mates.sort_unstable();
                mates
            })
            .unwrap_or_default();

        let role = if direct_leader.is_some() {
            PackRole::Follower
        } else if leads_others {
            PackRole::Leader
        } else {
            PackRole::Independent
        };

        Some(PackStructure {
            leader_id,
            follower_ids: followers.into_iter().collect(),
            teammate_ids,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_from_any_member() {
        let graph = InMemoryPackGraph::new();
        graph.add_pack(10, &[11, 12]);
        graph.set_leader(13, 11);

        let from_leader = graph.pack_structure(10).await.unwrap();
        assert_eq!(from_leader.leader_id, 10);
        assert_eq!(from_leader.follower_ids, vec![11, 12, 13]);
        assert_eq!(from_leader.role, PackRole::Leader);

        let from_follower = graph.pack_structure(12).await.unwrap();
        assert_eq!(from_follower.leader_id, 10);
        assert_eq!(from_follower.role, PackRole::Follower);
        assert!(from_follower.members().contains(&13));

        assert!(graph.pack_structure(99).await.is_none());
    }

    #[tokio::test]
    async fn teammates_share_a_team() {
        let graph = InMemoryPackGraph::new();
        graph.join_team(1, 7);
        graph.join_team(2, 7);
        graph.join_team(3, 8);

        let pack = graph.pack_structure(1).await.unwrap();
        assert_eq!(pack.leader_id, 1);
        assert_eq!(pack.teammate_ids, vec![2]);
        assert_eq!(pack.role, PackRole::Independent);
    }
}
