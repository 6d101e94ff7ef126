//! Tests for tokio spawner and read API utilities

use std::sync::Arc;
use std::time::Duration;

use capacity_scheduler::core::{
    build_schedule, CapacityWindow, Consumer, ConsumerRegistry, EqualDistribution, PoolInfo,
    ScheduleStore, SchedulerError, Spawn, TieBreak,
};
use capacity_scheduler::infra::InMemoryScheduleStore;
use capacity_scheduler::runtime::{parse_schedule_key, ScheduleReader, TokioSpawner};
use capacity_scheduler::util::{ConsumerId, ScheduleKey};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[test]
fn test_parse_schedule_key_errors_are_invalid_input() {
    assert_eq!(parse_schedule_key("current").unwrap(), ScheduleKey::Current);
    assert!(matches!(
        parse_schedule_key("yesterday"),
        Err(SchedulerError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_reader_serves_store_contents() {
    let store = Arc::new(InMemoryScheduleStore::new(Duration::from_secs(60), 4));
    let registry = ConsumerRegistry::new(TieBreak::default());
    registry
        .replace(vec![Consumer::new("a", 3.0), Consumer::new("b", 1.0)])
        .unwrap();
    let window = CapacityWindow {
        start: 20,
        length: 10,
        capacity: 10,
        min_guarantee: 0,
    };
    let schedule = build_schedule(&EqualDistribution, window, &registry.snapshot(), 1).unwrap();
    store.put_schedule(&schedule).await.unwrap();

    let info = PoolInfo {
        consumer_id: ConsumerId::new("a"),
        endpoint: Some("10.1.0.4:8091".into()),
        last_seen_ms: 1,
        attributes: Default::default(),
    };
    store
        .put_pool_info(info.clone(), Duration::from_secs(60))
        .await
        .unwrap();

    let reader = ScheduleReader::new(store);
    let current = reader.get_schedule_by_name("current").await.unwrap().unwrap();
    assert_eq!(current.window.start, 20);
    assert!(reader.get_schedule_by_name("30").await.unwrap().is_none());
    assert!(reader.get_schedule_by_name("soon").await.is_err());
    assert_eq!(
        reader.current_units_for(&ConsumerId::new("a")).await.unwrap(),
        Some(5)
    );
    assert_eq!(
        reader.current_units_for(&ConsumerId::new("zed")).await.unwrap(),
        None
    );
    assert_eq!(
        reader.get_pool_info(&ConsumerId::new("a")).await.unwrap(),
        Some(info)
    );
}
