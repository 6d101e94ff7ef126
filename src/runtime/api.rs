//! Read API served to worker and proxy processes.
//!
//! Transport is left to the embedding application; these functions return
//! the schedule and pool-info records as stored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{
    AllocationScheduler, PoolInfo, Schedule, ScheduleStore, SchedulerError, SchedulerPhase,
};
use crate::util::serde::{ConsumerId, ScheduleKey, WindowKey};

/// Parse `"current"` or a window start height.
pub fn parse_schedule_key(raw: &str) -> Result<ScheduleKey, SchedulerError> {
    raw.parse().map_err(SchedulerError::InvalidInput)
}

/// Read-only access to a schedule store.
#[derive(Clone)]
pub struct ScheduleReader {
    store: Arc<dyn ScheduleStore>,
}

impl ScheduleReader {
    /// Create a reader over `store`.
    pub fn new(store: Arc<dyn ScheduleStore>) -> Self {
        Self { store }
    }

    /// Schedule for `key`; `Ok(None)` for a window never computed.
    ///
    /// Store failures are returned to the caller unchanged.
    pub async fn get_schedule(&self, key: ScheduleKey) -> Result<Option<Arc<Schedule>>, SchedulerError> {
        self.store.get_schedule(key).await
    }

    /// Like [`get_schedule`](Self::get_schedule) with a textual key.
    pub async fn get_schedule_by_name(&self, raw: &str) -> Result<Option<Arc<Schedule>>, SchedulerError> {
        self.get_schedule(parse_schedule_key(raw)?).await
    }

    /// Unexpired pool info for a consumer.
    pub async fn get_pool_info(&self, consumer_id: &ConsumerId) -> Result<Option<PoolInfo>, SchedulerError> {
        self.store.get_pool_info(consumer_id).await
    }

    /// Units assigned to `consumer_id` in the current schedule, if any.
    pub async fn current_units_for(&self, consumer_id: &ConsumerId) -> Result<Option<u64>, SchedulerError> {
        Ok(self
            .get_schedule(ScheduleKey::Current)
            .await?
            .and_then(|s| s.entry_for(consumer_id).map(|e| e.units)))
    }
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag: running and serving a schedule.
    pub ok: bool,
    /// Loop phase.
    pub phase: SchedulerPhase,
    /// Window of the served schedule.
    pub serving_window: Option<WindowKey>,
    /// Served schedule belongs to an older window than the current one.
    pub stale: bool,
}

/// Return a health payload for a scheduler.
pub fn health(scheduler: &AllocationScheduler) -> Health {
    let status = scheduler.status();
    Health {
        ok: status.phase != SchedulerPhase::Stopped && status.serving_window.is_some(),
        phase: status.phase,
        serving_window: status.serving_window,
        stale: status.stale,
    }
}
