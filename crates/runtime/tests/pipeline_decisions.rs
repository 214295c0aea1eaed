mod common;

use std::path::Path;
use std::sync::Arc;

use mob_ai_core::{ActionId, ActionType, Archetype, FallbackLevel, ModelType};
use mob_ai_runtime::coordination::{Signal, SignalKind};
use mob_ai_runtime::{
    CacheConfig, DecisionPipeline, FallbackController, InMemoryPackGraph, InMemorySignalBoard,
    InferenceEngine, MetricsSink, PipelineConfig, TieredCache,
};

use common::{engine, follower, leader, request, write_policy};

struct Harness {
    pipeline: DecisionPipeline,
    engine: Arc<InferenceEngine>,
    fallback: Arc<FallbackController>,
    graph: Arc<InMemoryPackGraph>,
    signals: Arc<InMemorySignalBoard>,
}

async fn harness(model_dir: &Path, with_cache: bool) -> Harness {
    let (engine, fallback) = engine(model_dir);
    engine
        .load_all_models(&Archetype::all().collect::<Vec<_>>(), &ModelType::all().collect::<Vec<_>>())
        .await;
    let cache = with_cache.then(|| Arc::new(TieredCache::in_memory(CacheConfig::default())));
    let graph = Arc::new(InMemoryPackGraph::new());
    let signals = Arc::new(InMemorySignalBoard::new());
    let pipeline = DecisionPipeline::new(
        engine.clone(),
        cache,
        fallback.clone(),
        signals.clone(),
        graph.clone(),
        MetricsSink::new(),
        PipelineConfig::default(),
    );
    Harness {
        pipeline,
        engine,
        fallback,
        graph,
        signals,
    }
}

#[tokio::test]
async fn one_response_per_request_in_order() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), Archetype::Tank, ModelType::CombatDqn, ActionId::ATTACK);
    let h = harness(dir.path(), false).await;

    let requests = vec![
        request(1, 100, Archetype::Tank),
        request(2, 101, Archetype::Support),
        request(3, 102, Archetype::Tank),
    ];
    let responses = h.pipeline.process(&requests).await;

    let ids: Vec<i64> = responses.iter().map(|r| r.request_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    assert_eq!(responses[0].action_type, ActionType::Combat);
    assert_eq!(responses[0].action_id, ActionId::ATTACK);
    assert!(responses[0].model_outputs.contains_key("combat_dqn"));
    assert_eq!(responses[0].fallback_level, FallbackLevel::GpuFp16);

    // No support model: safe default, not an error.
    assert_eq!(responses[1].action_type, ActionType::Fallback);
    assert_eq!(responses[1].action_id, ActionId::IDLE);
    assert_eq!(responses[1].confidence, 0.0);

    assert!(responses.iter().all(|r| r.inference_latency_ms > 0.0));
}

#[tokio::test]
async fn repeated_state_hits_the_action_cache() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), Archetype::Mage, ModelType::CombatDqn, ActionId::SKILL_3);
    let h = harness(dir.path(), true).await;

    let first = h.pipeline.process(&[request(1, 200, Archetype::Mage)]).await;
    assert!(!first[0].cache_used);

    let second = h.pipeline.process(&[request(2, 200, Archetype::Mage)]).await;
    assert!(second[0].cache_used);
    assert_eq!(second[0].action_id, ActionId::SKILL_3);
    assert_eq!(second[0].confidence, first[0].confidence);
    assert_eq!(h.engine.statistics().model_calls, 1);
}

#[tokio::test]
async fn degraded_levels_skip_the_models() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), Archetype::Tank, ModelType::CombatDqn, ActionId::ATTACK);
    let h = harness(dir.path(), false).await;

    h.fallback.force_level(FallbackLevel::TraditionalAi);
    let responses = h.pipeline.process(&[request(1, 300, Archetype::Tank)]).await;
    assert_eq!(responses[0].action_type, ActionType::Fallback);
    assert_eq!(responses[0].action_id, ActionId::TRADITIONAL_AI);
    assert_eq!(responses[0].confidence, 0.0);
    assert_eq!(responses[0].fallback_level, FallbackLevel::TraditionalAi);

    h.fallback.force_level(FallbackLevel::RuleBasedMl);
    let responses = h.pipeline.process(&[request(2, 301, Archetype::Tank)]).await;
    assert_eq!(responses[0].action_type, ActionType::Fallback);
    assert!(responses[0].action_id.value() < ActionId::COUNT as u8);
    assert_eq!(responses[0].confidence, 0.5);

    assert_eq!(h.engine.statistics().model_calls, 0);
}

#[tokio::test]
async fn pack_subset_is_decided_jointly() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), Archetype::Aggressive, ModelType::CombatDqn, ActionId::ATTACK);
    write_policy(dir.path(), Archetype::Aggressive, ModelType::TeamCoordination, ActionId::MOVE_CLOSER);
    let h = harness(dir.path(), false).await;

    h.graph.add_pack(10, &[11, 12]);
    let attack = SignalKind::AttackTarget {
        target_threat: 0.8,
        target_priority: 0.9,
    };
    h.signals.send(11, Signal::new(10, attack, 5));

    let requests = vec![
        leader(1, 10, Archetype::Aggressive, &[11, 12]),
        follower(2, 11, Archetype::Aggressive, 10),
        follower(3, 12, Archetype::Aggressive, 10),
    ];
    let responses = h.pipeline.process(&requests).await;

    for response in &responses {
        assert_eq!(response.action_type, ActionType::Combat);
        assert_eq!(response.action_id, ActionId::MOVE_CLOSER);
        let tag = response.coordination.as_ref().expect("pack answers carry a coordination tag");
        assert!(tag.coordinated);
        assert!(tag.score >= 0.5);
    }
    assert_eq!(responses[1].target_monster_id, Some(10));
    assert!(responses[1].action_params.contains_key("coordination_bonus"));
}

#[tokio::test]
async fn batch_outside_the_pack_falls_back_to_individual_inference() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), Archetype::Ranged, ModelType::CombatDqn, ActionId::MOVE_AWAY);
    write_policy(dir.path(), Archetype::Ranged, ModelType::TeamCoordination, ActionId::MOVE_CLOSER);
    let h = harness(dir.path(), false).await;

    // 13 claims leader 10, but the graph only knows 10 and 11.
    h.graph.add_pack(10, &[11]);
    let requests = vec![
        leader(1, 10, Archetype::Ranged, &[11, 13]),
        follower(2, 11, Archetype::Ranged, 10),
        follower(3, 13, Archetype::Ranged, 10),
    ];
    let responses = h.pipeline.process(&requests).await;

    for response in &responses {
        assert_eq!(response.action_id, ActionId::MOVE_AWAY);
        assert!(response.coordination.is_none());
    }
}

#[tokio::test]
async fn lone_pack_member_is_decided_individually() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), Archetype::Defensive, ModelType::CombatDqn, ActionId::SKILL_1);
    let h = harness(dir.path(), false).await;
    h.graph.add_pack(40, &[41]);

    let responses = h
        .pipeline
        .process(&[follower(1, 41, Archetype::Defensive, 40)])
        .await;
    assert_eq!(responses[0].action_id, ActionId::SKILL_1);
    assert!(responses[0].coordination.is_none());
}
