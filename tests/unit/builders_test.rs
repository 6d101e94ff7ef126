//! Tests for builder modules

use std::sync::Arc;

use async_trait::async_trait;
use capacity_scheduler::builders::{build_store, SchedulerBuilder};
use capacity_scheduler::config::{SchedulerConfig, StoreBackendConfig};
use capacity_scheduler::core::{
    shared_sink, BlockSource, Consumer, EqualDistribution, InMemoryAuditSink, ScheduleStore,
    SchedulerError, StakeSource, TieBreak,
};
use capacity_scheduler::infra::InMemoryScheduleStore;
use capacity_scheduler::util::ScheduleKey;

struct NoStakes;

#[async_trait]
impl StakeSource for NoStakes {
    async fn fetch_consumers(&self) -> Result<Vec<Consumer>, SchedulerError> {
        Ok(Vec::new())
    }
}

struct Genesis;

#[async_trait]
impl BlockSource for Genesis {
    async fn current_block(&self) -> Result<u64, SchedulerError> {
        Ok(0)
    }
}

#[test]
fn test_builder_uses_config() {
    let config = SchedulerConfig {
        tie_break: TieBreak::IdentityDescending,
        ..SchedulerConfig::default()
    };
    let builder = SchedulerBuilder::new(config);
    assert_eq!(builder.config().capacity_per_window, 1_000);

    let scheduler = builder.build(Arc::new(NoStakes), Arc::new(Genesis)).unwrap();
    assert_eq!(scheduler.registry().tie_break(), TieBreak::IdentityDescending);
    assert!(scheduler.serving_schedule().is_none());
}

#[test]
fn test_builder_rejects_invalid_config() {
    let config = SchedulerConfig {
        max_history: 0,
        ..SchedulerConfig::default()
    };
    let result = SchedulerBuilder::new(config).build(Arc::new(NoStakes), Arc::new(Genesis));
    assert!(matches!(result, Err(SchedulerError::Config(_))));
}

#[test]
fn test_builder_with_overrides() {
    let store = Arc::new(InMemoryScheduleStore::new(
        std::time::Duration::from_secs(60),
        4,
    ));
    let audit = shared_sink(InMemoryAuditSink::new(16));
    let scheduler = SchedulerBuilder::new(SchedulerConfig::default())
        .with_store(store)
        .with_policy(Box::new(EqualDistribution))
        .with_audit(audit)
        .build(Arc::new(NoStakes), Arc::new(Genesis));
    assert!(scheduler.is_ok());
}

#[tokio::test]
async fn test_build_file_store_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = SchedulerConfig {
        store: StoreBackendConfig::File {
            path: dir.path().join("schedules"),
        },
        ..SchedulerConfig::default()
    };
    let store = build_store(&config).unwrap();
    assert!(store.get_schedule(ScheduleKey::Current).await.unwrap().is_none());
    assert!(dir.path().join("schedules").is_dir());
}
