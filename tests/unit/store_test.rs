//! Tests for schedule store backends

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use capacity_scheduler::core::{
    build_schedule, CapacityWindow, Consumer, ConsumerRegistry, PoolInfo, Schedule, ScheduleStore,
    StakeProportional, TieBreak,
};
use capacity_scheduler::infra::{FileScheduleStore, InMemoryScheduleStore};
use capacity_scheduler::util::{now_ms, ConsumerId, ScheduleKey};

fn schedule_for(start: u64) -> Schedule {
    let registry = ConsumerRegistry::new(TieBreak::default());
    registry
        .replace(vec![
            Consumer::new("alpha", 50.0),
            Consumer::new("beta", 30.0),
            Consumer::new("gamma", 20.0),
        ])
        .unwrap();
    let window = CapacityWindow {
        start,
        length: 10,
        capacity: 100,
        min_guarantee: 10,
    };
    build_schedule(&StakeProportional, window, &registry.snapshot(), 42).unwrap()
}

fn pool_info(id: &str) -> PoolInfo {
    PoolInfo {
        consumer_id: ConsumerId::new(id),
        endpoint: Some(format!("{id}.pool.internal:8091")),
        last_seen_ms: now_ms(),
        attributes: [("region".to_string(), "eu".to_string())].into_iter().collect(),
    }
}

#[tokio::test]
async fn test_memory_store_put_is_idempotent() {
    let store = InMemoryScheduleStore::new(Duration::from_secs(60), 8);
    let schedule = schedule_for(10);
    store.put_schedule(&schedule).await.unwrap();
    store.put_schedule(&schedule).await.unwrap();

    assert_eq!(store.window_keys().await.unwrap(), vec![10]);
    let current = store.get_schedule(ScheduleKey::Current).await.unwrap().unwrap();
    assert_eq!(*current, schedule);
}

#[tokio::test]
async fn test_unknown_window_is_absent() {
    let store = InMemoryScheduleStore::new(Duration::from_secs(60), 8);
    assert!(store.get_schedule(ScheduleKey::Current).await.unwrap().is_none());
    store.put_schedule(&schedule_for(10)).await.unwrap();
    assert!(store.get_schedule(ScheduleKey::Window(20)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_current_pointer_never_moves_backwards() {
    let store = InMemoryScheduleStore::new(Duration::from_secs(60), 8);
    store.put_schedule(&schedule_for(20)).await.unwrap();
    store.put_schedule(&schedule_for(10)).await.unwrap();

    let current = store.get_schedule(ScheduleKey::Current).await.unwrap().unwrap();
    assert_eq!(current.window.start, 20);
    // the older window is still retrievable by key
    let older = store.get_schedule(ScheduleKey::Window(10)).await.unwrap().unwrap();
    assert_eq!(older.window.start, 10);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let store = InMemoryScheduleStore::new(Duration::from_secs(60), 2);
    for start in [0, 10, 20] {
        store.put_schedule(&schedule_for(start)).await.unwrap();
    }
    assert_eq!(store.window_keys().await.unwrap(), vec![10, 20]);
    assert!(store.get_schedule(ScheduleKey::Window(0)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_windows_purged_but_current_still_served() {
    let store = InMemoryScheduleStore::new(Duration::ZERO, 8);
    store.put_schedule(&schedule_for(0)).await.unwrap();
    store.put_schedule(&schedule_for(10)).await.unwrap();

    assert!(store.get_schedule(ScheduleKey::Window(0)).await.unwrap().is_none());
    assert_eq!(store.purge_expired(now_ms() + 1).await.unwrap(), 2);
    assert!(store.window_keys().await.unwrap().is_empty());

    let current = store.get_schedule(ScheduleKey::Current).await.unwrap().unwrap();
    assert_eq!(current.window.start, 10);
}

#[tokio::test]
async fn test_pool_info_ttl() {
    let store = InMemoryScheduleStore::new(Duration::from_secs(60), 8);
    let live = pool_info("alpha");
    let gone = pool_info("beta");
    store
        .put_pool_info(live.clone(), Duration::from_secs(60))
        .await
        .unwrap();
    store
        .put_pool_info(gone.clone(), Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(store.get_pool_info(&live.consumer_id).await.unwrap(), Some(live));
    assert_eq!(store.get_pool_info(&gone.consumer_id).await.unwrap(), None);
    assert_eq!(store.purge_expired(now_ms() + 1).await.unwrap(), 1);
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FileScheduleStore::open(dir.path(), Duration::from_secs(60), 8).unwrap();
        store.put_schedule(&schedule_for(0)).await.unwrap();
        store.put_schedule(&schedule_for(10)).await.unwrap();
        let info = pool_info("gamma");
        store.put_pool_info(info, Duration::from_secs(60)).await.unwrap();
    }

    let reopened = FileScheduleStore::open(dir.path(), Duration::from_secs(60), 8).unwrap();
    let current = reopened.get_schedule(ScheduleKey::Current).await.unwrap().unwrap();
    assert_eq!(*current, schedule_for(10));
    assert!(reopened.get_schedule(ScheduleKey::Window(0)).await.unwrap().is_some());
    assert_eq!(reopened.window_keys().await.unwrap(), vec![0, 10]);
    assert!(reopened
        .get_pool_info(&ConsumerId::new("gamma"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_file_store_recovers_from_torn_write() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FileScheduleStore::open(dir.path(), Duration::from_secs(60), 8).unwrap();
        store.put_schedule(&schedule_for(0)).await.unwrap();
    }
    // simulate a crash halfway through appending the next record
    std::fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join("schedules.jsonl"))
        .unwrap()
        .write_all(b"{\"value\":{\"window\":")
        .unwrap();

    {
        let store = FileScheduleStore::open(dir.path(), Duration::from_secs(60), 8).unwrap();
        assert_eq!(store.window_keys().await.unwrap(), vec![0]);
        store.put_schedule(&schedule_for(10)).await.unwrap();
    }

    let store = FileScheduleStore::open(dir.path(), Duration::from_secs(60), 8).unwrap();
    assert_eq!(store.window_keys().await.unwrap(), vec![0, 10]);
    let current = store.get_schedule(ScheduleKey::Current).await.unwrap().unwrap();
    assert_eq!(current.window.start, 10);
}

#[tokio::test]
async fn test_pool_info_is_keyed_by_its_own_consumer() {
    let store = InMemoryScheduleStore::new(Duration::from_secs(60), 8);
    let mut info = pool_info("alpha");
    store.put_pool_info(info.clone(), Duration::from_secs(60)).await.unwrap();

    info.endpoint = Some("alpha.pool.internal:9000".into());
    store.put_pool_info(info.clone(), Duration::from_secs(60)).await.unwrap();
    assert_eq!(store.get_pool_info(&ConsumerId::new("alpha")).await.unwrap(), Some(info));
    assert_eq!(store.get_pool_info(&ConsumerId::new("beta")).await.unwrap(), None);
}

#[tokio::test]
async fn test_failed_current_write_is_not_replayed() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FileScheduleStore::open(dir.path(), Duration::from_secs(60), 8).unwrap();
        store.put_schedule(&schedule_for(0)).await.unwrap();

        // the log append succeeds but the current pointer cannot be replaced
        std::fs::create_dir(dir.path().join("current.json.tmp")).unwrap();
        assert!(store.put_schedule(&schedule_for(10)).await.is_err());
        let current = store.get_schedule(ScheduleKey::Current).await.unwrap().unwrap();
        assert_eq!(current.window.start, 0);
    }

    let reopened = FileScheduleStore::open(dir.path(), Duration::from_secs(60), 8).unwrap();
    let current = reopened.get_schedule(ScheduleKey::Current).await.unwrap().unwrap();
    assert_eq!(*current, schedule_for(0));
    assert!(reopened.get_schedule(ScheduleKey::Window(10)).await.unwrap().is_none());
    assert_eq!(reopened.window_keys().await.unwrap(), vec![0]);

    // the pointer moves again once the write path is healthy
    std::fs::remove_dir(dir.path().join("current.json.tmp")).unwrap();
    reopened.put_schedule(&schedule_for(10)).await.unwrap();
    let current = reopened.get_schedule(ScheduleKey::Current).await.unwrap().unwrap();
    assert_eq!(current.window.start, 10);
}

#[tokio::test]
async fn test_file_store_shared_across_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileScheduleStore::open(dir.path(), Duration::from_secs(60), 32).unwrap());

    let writers: Vec<_> = (0..8u64)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.put_schedule(&schedule_for(i * 10)).await })
        })
        .collect();
    for result in futures::future::join_all(writers).await {
        result.unwrap().unwrap();
    }

    let current = store.get_schedule(ScheduleKey::Current).await.unwrap().unwrap();
    assert_eq!(current.window.start, 70);
    assert_eq!(store.window_keys().await.unwrap().len(), 8);
}
