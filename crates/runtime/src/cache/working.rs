//! L1 working memory: the last few states each monster reported.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use mob_ai_core::MonsterId;

/// Per-monster ring of recent states with a sub-second lifetime.
///
/// Never shared across monsters or processes.
#[derive(Debug)]
pub struct WorkingMemory {
    ttl: Duration,
    depth: usize,
    slots: Mutex<HashMap<MonsterId, VecDeque<(Instant, Vec<f32>)>>>,
}

impl WorkingMemory {
    pub fn new(ttl: Duration, depth: usize) -> Self {
        Self {
            ttl,
            depth: depth.max(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, monster_id: MonsterId, state: &[f32]) {
        let now = Instant::now();
        let mut slots = self.lock();
        let ring = slots.entry(monster_id).or_default();
        Self::prune(ring, now, self.ttl);
        if ring.len() == self.depth {
            ring.pop_front();
        }
        ring.push_back((now, state.to_vec()));
    }

    /// Unexpired states for `monster_id`, oldest first.
    pub fn recent(&self, monster_id: MonsterId) -> Vec<Vec<f32>> {
        let now = Instant::now();
        let mut slots = self.lock();
        let Some(ring) = slots.get_mut(&monster_id) else {
            return Vec::new();
        };
        Self::prune(ring, now, self.ttl);
        ring.iter().map(|(_, state)| state.clone()).collect()
    }

    /// Drops expired states and empty slots. Returns how many monsters were
    /// evicted entirely.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|_, ring| {
            Self::prune(ring, now, self.ttl);
            !ring.is_empty()
        });
        before - slots.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn tracked_monsters(&self) -> usize {
        self.lock().len()
    }

    fn prune(ring: &mut VecDeque<(Instant, Vec<f32>)>, now: Instant, ttl: Duration) {
        while let Some((recorded, _)) = ring.front() {
            if now.duration_since(*recorded) >= ttl {
                ring.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MonsterId, VecDeque<(Instant, Vec<f32>)>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn keeps_last_n_and_expires() {
        let memory = WorkingMemory::new(Duration::from_millis(500), 2);
        memory.record(1, &[0.1]);
        memory.record(1, &[0.2]);
        memory.record(1, &[0.3]);
        memory.record(2, &[9.0]);

        assert_eq!(memory.recent(1), vec![vec![0.2], vec![0.3]]);
        assert_eq!(memory.recent(2), vec![vec![9.0]]);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(memory.recent(1).is_empty());
        assert_eq!(memory.purge_expired(), 2);
        assert_eq!(memory.tracked_monsters(), 0);
    }
}
