mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mob_ai_core::{ActionId, ActionType, Archetype, FallbackLevel, ModelKey, ModelType, RequestStatus};
use mob_ai_runtime::health::{StaticGpuProbe, StaticHostProbe};
use mob_ai_runtime::{
    InMemoryKvStore, InMemoryRequestQueue, Service, ServiceConfig, ServiceError,
};

use common::{engine_config, row, write_policy};

fn config(model_dir: &Path) -> ServiceConfig {
    ServiceConfig {
        engine: engine_config(model_dir),
        archetypes: vec![Archetype::Tank, Archetype::Ranged],
        model_types: vec![ModelType::CombatDqn],
        worker_count: 2,
        batch_size: 8,
        poll_interval: Duration::from_millis(5),
        ..ServiceConfig::default()
    }
}

async fn start(model_dir: &Path, queue: Arc<InMemoryRequestQueue>) -> Service {
    Service::builder()
        .config(config(model_dir))
        .queue(queue)
        .cache_store(Arc::new(InMemoryKvStore::new()))
        .health_probes(
            Arc::new(StaticGpuProbe::absent()),
            Arc::new(StaticHostProbe::at(40.0, 20.0, 30.0)),
        )
        .build()
        .await
        .unwrap()
}

async fn wait_for_responses(queue: &InMemoryRequestQueue, count: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while queue.responses().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("responses were not written in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serves_queued_requests_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), Archetype::Tank, ModelType::CombatDqn, ActionId::ATTACK);
    write_policy(dir.path(), Archetype::Ranged, ModelType::CombatDqn, ActionId::MOVE_AWAY);

    let queue = Arc::new(InMemoryRequestQueue::new());
    let service = start(dir.path(), queue.clone()).await;

    // Without a GPU the service starts on the CPU path.
    assert_eq!(service.fallback().current_level(), FallbackLevel::CpuInt8);
    assert_eq!(service.engine().loaded_models().len(), 2);

    for id in 1..=40 {
        let archetype = if id % 2 == 0 { Archetype::Tank } else { Archetype::Ranged };
        queue.push(row(id, 1000 + id, archetype));
    }
    wait_for_responses(&queue, 40).await;

    let responses = queue.responses();
    assert_eq!(responses.len(), 40);
    for response in &responses {
        let expected = if response.request_id % 2 == 0 {
            ActionId::ATTACK
        } else {
            ActionId::MOVE_AWAY
        };
        assert_eq!(response.action_type, ActionType::Combat);
        assert_eq!(response.action_id, expected);
        assert_eq!(queue.status(response.request_id), Some(RequestStatus::Completed));
    }

    // Counters are bumped right after the write lands.
    let handle = service.handle();
    let stats = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stats = handle.statistics().await.unwrap();
            if stats.workers.requests == 40 {
                break stats;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker counters never caught up");
    assert_eq!(stats.engine.models_loaded, 2);
    assert_eq!(stats.engine.total_inferences, 40);

    let health = handle.health_check().await.unwrap();
    assert!(health.cache_connected);
    assert_eq!(health.engine.models_loaded, 2);

    service.shutdown().await.unwrap();
    assert!(matches!(
        handle.statistics().await,
        Err(ServiceError::CommandChannelClosed)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn operator_commands_take_effect() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), Archetype::Tank, ModelType::CombatDqn, ActionId::ATTACK);

    let queue = Arc::new(InMemoryRequestQueue::new());
    let service = start(dir.path(), queue.clone()).await;
    let handle = service.handle();

    handle.force_level(FallbackLevel::TraditionalAi).await.unwrap();
    queue.push(row(1, 500, Archetype::Tank));
    wait_for_responses(&queue, 1).await;
    let response = queue.response_for(1).unwrap();
    assert_eq!(response.action_type, ActionType::Fallback);
    assert_eq!(response.action_id, ActionId::TRADITIONAL_AI);

    handle.force_level(FallbackLevel::CpuInt8).await.unwrap();

    // Swap the tank policy on disk and hot-reload it.
    write_policy(dir.path(), Archetype::Tank, ModelType::CombatDqn, ActionId::FLEE);
    let key = ModelKey::new(Archetype::Tank, ModelType::CombatDqn);
    let report = handle.reload_model(key, None).await.unwrap();
    assert_eq!(report.reload_count, 1);

    queue.push(row(2, 501, Archetype::Tank));
    wait_for_responses(&queue, 2).await;
    assert_eq!(queue.response_for(2).unwrap().action_id, ActionId::FLEE);

    let err = handle
        .reload_model(ModelKey::new(Archetype::Mage, ModelType::CombatDqn), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Engine(_)));

    let results = handle.reload_all().await.unwrap();
    assert_eq!(results.get(&key), Some(&true));

    handle.clear_cache(None).await.unwrap();

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn no_models_means_traditional_ai() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(InMemoryRequestQueue::new());
    let service = start(dir.path(), queue.clone()).await;

    assert_eq!(service.fallback().current_level(), FallbackLevel::TraditionalAi);

    queue.push(row(1, 900, Archetype::Ranged));
    wait_for_responses(&queue, 1).await;
    assert_eq!(queue.response_for(1).unwrap().action_id, ActionId::TRADITIONAL_AI);

    service.shutdown().await.unwrap();
}
