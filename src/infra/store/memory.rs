//! In-memory schedule store.
//!
//! The current schedule lives behind an `ArcSwapOption` so readers never
//! take a lock; history and pool info sit behind `parking_lot` read-write
//! locks with brief critical sections.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::{PoolInfo, Schedule, ScheduleStore, SchedulerError, StoredRecord};
use crate::util::clock::{expiry_ms, now_ms};
use crate::util::serde::{ConsumerId, ScheduleKey, WindowKey};

/// Simple in-memory store for development, testing, and as the cache
/// underneath the file-backed store.
pub struct InMemoryScheduleStore {
    schedule_ttl: Duration,
    max_history: usize,
    current: ArcSwapOption<Schedule>,
    history: RwLock<BTreeMap<WindowKey, StoredRecord<Arc<Schedule>>>>,
    pool_info: RwLock<HashMap<ConsumerId, StoredRecord<PoolInfo>>>,
}

impl InMemoryScheduleStore {
    /// Create a store retaining at most `max_history` windows for `schedule_ttl` each.
    pub fn new(schedule_ttl: Duration, max_history: usize) -> Self {
        Self {
            schedule_ttl,
            max_history: max_history.max(1),
            current: ArcSwapOption::empty(),
            history: RwLock::new(BTreeMap::new()),
            pool_info: RwLock::new(HashMap::new()),
        }
    }

    /// TTL applied to schedules stored under their window key.
    pub const fn schedule_ttl(&self) -> Duration {
        self.schedule_ttl
    }

    /// Insert a schedule record and advance the current pointer if it is
    /// not older than the current one.
    pub(crate) fn insert_schedule(&self, schedule: &Schedule, now: u128) {
        self.restore_schedule(StoredRecord {
            value: Arc::new(schedule.clone()),
            stored_at_ms: now,
            expires_at_ms: expiry_ms(now, self.schedule_ttl),
        });
    }

    /// Insert an existing record (used on reload) and advance the current pointer.
    pub(crate) fn restore_schedule(&self, record: StoredRecord<Arc<Schedule>>) {
        self.store_record(record, true);
    }

    /// Insert an existing record into history without touching the current pointer.
    pub(crate) fn restore_history(&self, record: StoredRecord<Arc<Schedule>>) {
        self.store_record(record, false);
    }

    fn store_record(&self, record: StoredRecord<Arc<Schedule>>, advance: bool) {
        let key = record.value.key();
        let schedule = Arc::clone(&record.value);

        // History lock serializes writers; the pointer swap below is the
        // single point readers of `Current` observe.
        let mut history = self.history.write();
        history.insert(key, record);

        if advance {
            let current_key = self.current.load_full().map(|s| s.key());
            if current_key.is_none_or(|k| k <= key) {
                self.current.store(Some(schedule));
            } else {
                tracing::warn!(
                    window_start = key,
                    current = current_key,
                    "stored schedule for an older window; current pointer unchanged"
                );
            }
        }

        while history.len() > self.max_history {
            let Some((oldest, _)) = history.pop_first() else {
                break;
            };
            tracing::debug!(window_start = oldest, "evicted schedule beyond history bound");
        }
    }

    /// Point the current pointer at an already stored window.
    pub(crate) fn set_current(&self, schedule: Arc<Schedule>) {
        self.current.store(Some(schedule));
    }

    pub(crate) fn lookup_schedule(&self, key: ScheduleKey, now: u128) -> Option<Arc<Schedule>> {
        let current = self.current.load_full();
        match key {
            ScheduleKey::Current => current,
            ScheduleKey::Window(start) => {
                if let Some(current) = current.filter(|c| c.key() == start) {
                    return Some(current);
                }
                self.history
                    .read()
                    .get(&start)
                    .filter(|r| !r.is_expired(now))
                    .map(|r| Arc::clone(&r.value))
            }
        }
    }

    pub(crate) fn insert_pool_info(&self, info: PoolInfo, ttl: Duration, now: u128) {
        self.restore_pool_info(StoredRecord {
            value: info,
            stored_at_ms: now,
            expires_at_ms: expiry_ms(now, ttl),
        });
    }

    /// Insert a pool-info record keyed by its own consumer id.
    pub(crate) fn restore_pool_info(&self, record: StoredRecord<PoolInfo>) {
        let consumer_id = record.value.consumer_id.clone();
        self.pool_info.write().insert(consumer_id, record);
    }

    pub(crate) fn lookup_pool_info(&self, consumer_id: &ConsumerId, now: u128) -> Option<PoolInfo> {
        self.pool_info
            .read()
            .get(consumer_id)
            .filter(|r| !r.is_expired(now))
            .map(|r| r.value.clone())
    }

    pub(crate) fn purge(&self, now: u128) -> usize {
        let mut removed = 0;
        {
            let mut history = self.history.write();
            let before = history.len();
            history.retain(|_, r| !r.is_expired(now));
            removed += before - history.len();
        }
        {
            let mut pool_info = self.pool_info.write();
            let before = pool_info.len();
            pool_info.retain(|_, r| !r.is_expired(now));
            removed += before - pool_info.len();
        }
        removed
    }

    /// Snapshot of retained schedule records, ascending by window.
    pub(crate) fn schedule_records(&self) -> Vec<StoredRecord<Arc<Schedule>>> {
        self.history.read().values().cloned().collect()
    }

    /// Snapshot of retained pool-info records.
    pub(crate) fn pool_info_records(&self) -> Vec<StoredRecord<PoolInfo>> {
        self.pool_info.read().values().cloned().collect()
    }

    pub(crate) fn keys(&self) -> Vec<WindowKey> {
        self.history.read().keys().copied().collect()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn put_schedule(&self, schedule: &Schedule) -> Result<(), SchedulerError> {
        self.insert_schedule(schedule, now_ms());
        Ok(())
    }

    async fn get_schedule(&self, key: ScheduleKey) -> Result<Option<Arc<Schedule>>, SchedulerError> {
        Ok(self.lookup_schedule(key, now_ms()))
    }

    async fn put_pool_info(&self, info: PoolInfo, ttl: Duration) -> Result<(), SchedulerError> {
        self.insert_pool_info(info, ttl, now_ms());
        Ok(())
    }

    async fn get_pool_info(&self, consumer_id: &ConsumerId) -> Result<Option<PoolInfo>, SchedulerError> {
        Ok(self.lookup_pool_info(consumer_id, now_ms()))
    }

    async fn purge_expired(&self, now_ms: u128) -> Result<usize, SchedulerError> {
        let removed = self.purge(now_ms);
        if removed > 0 {
            tracing::debug!(removed, "purged expired store records");
        }
        Ok(removed)
    }

    async fn window_keys(&self) -> Result<Vec<WindowKey>, SchedulerError> {
        Ok(self.keys())
    }
}
