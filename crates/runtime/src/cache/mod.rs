//! Three-tier decision cache.
//!
//! - **L1** working memory: last few states per monster, in process only
//! - **L2** action cache: `l2:{monster_id}:{state_hash}` → `"action_id:confidence"`
//! - **L3** model-output cache: `l3:{archetype}:{model_type}:{state_hash}` →
//!   serialized tensor, shared by every monster of an archetype
//!
//! L2 and L3 live in a shared [`KeyValueStore`]. The cache is an
//! optimization only: read errors count as misses, write errors are logged
//! and dropped.
//!
//! State hashes quantize each feature to [`CacheConfig::precision`] decimal
//! places first. Lowering it makes near-identical states share entries
//! (higher hit rate, slightly staler decisions); raising it does the opposite.

mod memory;
mod redis;
mod store;
mod working;

pub use memory::InMemoryKvStore;
pub use self::redis::RedisKvStore;
pub use store::{CacheError, KeyValueStore, Result};
pub use working::WorkingMemory;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use mob_ai_core::{
    ActionId, Archetype, HashPrecision, ModelType, MonsterId, SerializedTensor, StateHash, Tensor,
    hash_state,
};

use crate::metrics::MetricsSink;

/// Cache tier label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheTier {
    L1,
    L2,
    L3,
}

impl CacheTier {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
            CacheTier::L3 => "l3",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// When false, L2/L3 lookups always miss and writes are skipped.
    pub enabled: bool,
    pub precision: HashPrecision,
    pub l1_ttl: Duration,
    pub l1_depth: usize,
    pub l2_ttl: Duration,
    pub l3_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            precision: HashPrecision::default(),
            l1_ttl: Duration::from_millis(500),
            l1_depth: 8,
            l2_ttl: Duration::from_secs(10),
            l3_ttl: Duration::from_secs(10),
        }
    }
}

/// Point-in-time cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize)]
pub struct CacheStats {
    pub queries_total: u64,
    pub l2_queries: u64,
    pub l2_hits: u64,
    pub l3_queries: u64,
    pub l3_hits: u64,
    pub l2_hit_rate: f64,
    pub l3_hit_rate: f64,
    pub total_hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    l2_queries: AtomicU64,
    l2_hits: AtomicU64,
    l3_queries: AtomicU64,
    l3_hits: AtomicU64,
}

pub struct TieredCache {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
    working: WorkingMemory,
    counters: Counters,
    metrics: MetricsSink,
}

impl TieredCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig, metrics: MetricsSink) -> Self {
        let working = WorkingMemory::new(config.l1_ttl, config.l1_depth);
        Self {
            store,
            config,
            working,
            counters: Counters::default(),
            metrics,
        }
    }

    /// Cache over a fresh [`InMemoryKvStore`].
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(Arc::new(InMemoryKvStore::new()), config, MetricsSink::new())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn state_hash(&self, state: &[f32]) -> StateHash {
        hash_state(state, self.config.precision)
    }

    // ------------------------------------------------------------------
    // L1
    // ------------------------------------------------------------------

    pub fn record_state(&self, monster_id: MonsterId, state: &[f32]) {
        self.working.record(monster_id, state);
    }

    pub fn recent_states(&self, monster_id: MonsterId) -> Vec<Vec<f32>> {
        self.working.recent(monster_id)
    }

    pub fn purge_working_memory(&self) -> usize {
        self.working.purge_expired()
    }

    // ------------------------------------------------------------------
    // L2
    // ------------------------------------------------------------------

    pub fn action_key(monster_id: MonsterId, hash: &StateHash) -> String {
        format!("l2:{monster_id}:{hash}")
    }

    /// L2 lookup for `(monster_id, state)`.
    pub async fn check_action(&self, monster_id: MonsterId, state: &[f32]) -> Option<(ActionId, f32)> {
        if !self.config.enabled {
            return None;
        }
        self.counters.l2_queries.fetch_add(1, Ordering::Relaxed);
        let key = Self::action_key(monster_id, &self.state_hash(state));

        let hit = match self.store.get(&key).await {
            Ok(Some(bytes)) => decode_action(&bytes),
            Ok(None) => None,
            Err(e) => {
                warn!(target: "mob_ai::cache", %key, error = %e, "L2 read failed, treating as miss");
                None
            }
        };

        if hit.is_some() {
            self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_cache_hit(CacheTier::L2);
        } else {
            self.metrics.record_cache_miss(CacheTier::L2);
        }
        hit
    }

    /// L2 write; `ttl` defaults to [`CacheConfig::l2_ttl`].
    pub async fn update_action(
        &self,
        monster_id: MonsterId,
        state: &[f32],
        action: ActionId,
        confidence: f32,
        ttl: Option<Duration>,
    ) {
        if !self.config.enabled {
            return;
        }
        let key = Self::action_key(monster_id, &self.state_hash(state));
        let value = format!("{}:{}", action.value(), confidence).into_bytes();
        let ttl = ttl.unwrap_or(self.config.l2_ttl);
        if let Err(e) = self.store.set_ex(&key, value, ttl).await {
            warn!(target: "mob_ai::cache", %key, error = %e, "L2 write failed");
        }
    }

    // ------------------------------------------------------------------
    // L3
    // ------------------------------------------------------------------

    pub fn model_output_key(archetype: Archetype, model_type: ModelType, hash: &StateHash) -> String {
        format!("l3:{archetype}:{model_type}:{hash}")
    }

    pub async fn check_model_output(
        &self,
        archetype: Archetype,
        model_type: ModelType,
        hash: &StateHash,
    ) -> Option<Tensor> {
        let key = Self::model_output_key(archetype, model_type, hash);
        self.check_model_outputs(std::slice::from_ref(&key))
            .await
            .into_iter()
            .next()
            .flatten()
    }

    /// Batched L3 lookup, one result per key in order.
    pub async fn check_model_outputs(&self, keys: &[String]) -> Vec<Option<Tensor>> {
        if !self.config.enabled || keys.is_empty() {
            return vec![None; keys.len()];
        }
        self.counters
            .l3_queries
            .fetch_add(keys.len() as u64, Ordering::Relaxed);

        let raw = match self.store.get_many(keys).await {
            Ok(values) => values,
            Err(e) => {
                warn!(target: "mob_ai::cache", keys = keys.len(), error = %e, "L3 read failed, treating as miss");
                vec![None; keys.len()]
            }
        };

        raw.into_iter()
            .zip(keys)
            .map(|(bytes, key)| {
                let tensor = bytes.and_then(|bytes| decode_tensor(key, &bytes));
                if tensor.is_some() {
                    self.counters.l3_hits.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_cache_hit(CacheTier::L3);
                } else {
                    self.metrics.record_cache_miss(CacheTier::L3);
                }
                tensor
            })
            .collect()
    }

    pub async fn update_model_output(
        &self,
        archetype: Archetype,
        model_type: ModelType,
        hash: &StateHash,
        tensor: &Tensor,
        ttl: Option<Duration>,
    ) {
        let key = Self::model_output_key(archetype, model_type, hash);
        self.store_model_output(&key, tensor, ttl).await;
    }

    pub(crate) async fn store_model_output(&self, key: &str, tensor: &Tensor, ttl: Option<Duration>) {
        if !self.config.enabled {
            return;
        }
        let bytes = match SerializedTensor::from_tensor(tensor).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target: "mob_ai::cache", %key, error = %e, "L3 encode failed");
                return;
            }
        };
        let ttl = ttl.unwrap_or(self.config.l3_ttl);
        if let Err(e) = self.store.set_ex(key, bytes, ttl).await {
            warn!(target: "mob_ai::cache", %key, error = %e, "L3 write failed");
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    pub fn stats(&self) -> CacheStats {
        let l2_queries = self.counters.l2_queries.load(Ordering::Relaxed);
        let l2_hits = self.counters.l2_hits.load(Ordering::Relaxed);
        let l3_queries = self.counters.l3_queries.load(Ordering::Relaxed);
        let l3_hits = self.counters.l3_hits.load(Ordering::Relaxed);
        let queries_total = l2_queries + l3_queries;
        CacheStats {
            queries_total,
            l2_queries,
            l2_hits,
            l3_queries,
            l3_hits,
            l2_hit_rate: ratio(l2_hits, l2_queries),
            l3_hit_rate: ratio(l3_hits, l3_queries),
            total_hit_rate: ratio(l2_hits + l3_hits, queries_total),
        }
    }

    /// Bulk invalidation. With no pattern, clears both shared tiers and the
    /// working memory. Returns the number of shared-store keys removed.
    pub async fn clear(&self, pattern: Option<&str>) -> u64 {
        let patterns: Vec<&str> = match pattern {
            Some(pattern) => vec![pattern],
            None => {
                self.working.clear();
                vec!["l2:*", "l3:*"]
            }
        };

        let mut removed = 0;
        for pattern in patterns {
            match self.store.delete_matching(pattern).await {
                Ok(n) => removed += n,
                Err(e) => warn!(target: "mob_ai::cache", pattern, error = %e, "cache clear failed"),
            }
        }
        debug!(target: "mob_ai::cache", removed, "cache cleared");
        removed
    }

    /// Drops expired entries from stores that do not expire keys on their
    /// own. Returns the number removed.
    pub async fn purge_expired(&self) -> u64 {
        match self.store.purge_expired().await {
            Ok(purged) => {
                if purged > 0 {
                    debug!(target: "mob_ai::cache", purged, "expired store entries purged");
                }
                purged
            }
            Err(e) => {
                warn!(target: "mob_ai::cache", error = %e, "expired entry purge failed");
                0
            }
        }
    }

    /// Whether the shared store answers.
    pub async fn health_check(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}

fn ratio(hits: u64, queries: u64) -> f64 {
    if queries == 0 {
        0.0
    } else {
        hits as f64 / queries as f64
    }
}

fn decode_action(bytes: &[u8]) -> Option<(ActionId, f32)> {
    let text = std::str::from_utf8(bytes).ok()?;
    let (action, confidence) = text.split_once(':')?;
    Some((ActionId(action.parse().ok()?), confidence.parse().ok()?))
}

fn decode_tensor(key: &str, bytes: &[u8]) -> Option<Tensor> {
    match SerializedTensor::decode(bytes).and_then(|envelope| envelope.to_tensor()) {
        Ok(tensor) => Some(tensor),
        Err(e) => {
            debug!(target: "mob_ai::cache", %key, error = %e, "discarding undecodable L3 entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(store: Arc<InMemoryKvStore>) -> TieredCache {
        TieredCache::new(store, CacheConfig::default(), MetricsSink::new())
    }

    #[tokio::test(start_paused = true)]
    async fn action_round_trip_until_ttl() {
        let cache = TieredCache::in_memory(CacheConfig::default());
        let state = vec![0.3_f32; 64];

        assert_eq!(cache.check_action(7, &state).await, None);
        cache
            .update_action(7, &state, ActionId::SKILL_1, 0.85, None)
            .await;
        assert_eq!(
            cache.check_action(7, &state).await,
            Some((ActionId::SKILL_1, 0.85))
        );

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.check_action(7, &state).await, None);

        let stats = cache.stats();
        assert_eq!(stats.l2_queries, 3);
        assert_eq!(stats.l2_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_model_outputs_are_purged_from_the_store() {
        let store = Arc::new(InMemoryKvStore::new());
        let cache = cache_with(store.clone());
        let tensor = Tensor::new(vec![1, 2], vec![0.4, 0.6]).unwrap();
        for i in 0..50 {
            let hash = cache.state_hash(&[i as f32; 8]);
            cache
                .update_model_output(Archetype::Tank, ModelType::CombatDqn, &hash, &tensor, None)
                .await;
        }
        cache.update_action(3, &[0.2; 8], ActionId::FLEE, 0.7, Some(Duration::from_secs(600))).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.purge_expired().await, 50);
        assert_eq!(store.len(), 1);
        assert_eq!(cache.check_action(3, &[0.2; 8]).await, Some((ActionId::FLEE, 0.7)));
    }

    #[tokio::test]
    async fn near_identical_states_share_an_entry() {
        let cache = TieredCache::in_memory(CacheConfig::default());
        let a = vec![0.501_f32; 64];
        let mut b = a.clone();
        b[10] = 0.5014;

        cache.update_action(1, &a, ActionId::ATTACK, 0.9, None).await;
        assert_eq!(cache.check_action(1, &b).await, Some((ActionId::ATTACK, 0.9)));
        assert_eq!(cache.check_action(2, &b).await, None, "L2 is per monster");
    }

    #[tokio::test]
    async fn model_output_is_shared_across_monsters_of_an_archetype() {
        let cache = TieredCache::in_memory(CacheConfig::default());
        let state = vec![0.1_f32; 64];
        let hash = cache.state_hash(&state);
        let tensor = Tensor::new(vec![1, 3], vec![0.2, 0.5, 0.3]).unwrap();

        cache
            .update_model_output(Archetype::Mage, ModelType::CombatDqn, &hash, &tensor, None)
            .await;
        assert_eq!(
            cache
                .check_model_output(Archetype::Mage, ModelType::CombatDqn, &hash)
                .await,
            Some(tensor)
        );
        assert_eq!(
            cache
                .check_model_output(Archetype::Tank, ModelType::CombatDqn, &hash)
                .await,
            None
        );
        assert_eq!(cache.stats().l3_hits, 1);
    }

    #[tokio::test]
    async fn store_failures_fail_open() {
        let store = Arc::new(InMemoryKvStore::new());
        let cache = cache_with(store.clone());
        let state = vec![0.0_f32; 64];

        store.set_failing(true);
        cache.update_action(1, &state, ActionId::ATTACK, 0.9, None).await;
        assert_eq!(cache.check_action(1, &state).await, None);
        assert!(!cache.health_check().await);

        store.set_failing(false);
        assert!(cache.health_check().await);
    }

    #[tokio::test]
    async fn disabled_cache_never_hits() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = TieredCache::in_memory(config);
        let state = vec![0.0_f32; 64];
        cache.update_action(1, &state, ActionId::ATTACK, 0.9, None).await;
        assert_eq!(cache.check_action(1, &state).await, None);
        assert_eq!(cache.stats().queries_total, 0);
    }

    #[tokio::test]
    async fn clear_by_pattern() {
        let store = Arc::new(InMemoryKvStore::new());
        let cache = cache_with(store.clone());
        let state = vec![0.0_f32; 64];
        let hash = cache.state_hash(&state);
        let tensor = Tensor::new(vec![1, 2], vec![1.0, 0.0]).unwrap();

        cache.update_action(1, &state, ActionId::ATTACK, 0.9, None).await;
        cache
            .update_model_output(Archetype::Tank, ModelType::SkillDqn, &hash, &tensor, None)
            .await;

        assert_eq!(cache.clear(Some("l3:tank:*")).await, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(cache.clear(None).await, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_action_entries_are_misses() {
        assert_eq!(decode_action(b"3:0.5"), Some((ActionId::MOVE_AWAY, 0.5)));
        assert_eq!(decode_action(b"garbage"), None);
        assert_eq!(decode_action(b"999:0.5"), None);
    }
}
