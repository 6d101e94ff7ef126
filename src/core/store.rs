//! Persistence abstraction for schedules and per-consumer pool info.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::schedule::Schedule;
use crate::core::SchedulerError;
use crate::util::serde::{ConsumerId, ScheduleKey, WindowKey};

/// Auxiliary per-consumer metadata with its own expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    /// Consumer this record describes.
    pub consumer_id: ConsumerId,
    /// Endpoint workers should use to reach the consumer, if known.
    pub endpoint: Option<String>,
    /// Last time the consumer was observed, milliseconds since epoch.
    pub last_seen_ms: u128,
    /// Free-form attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A value with an explicit expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord<T> {
    /// Stored value.
    pub value: T,
    /// Write timestamp in milliseconds.
    pub stored_at_ms: u128,
    /// Absolute expiry in milliseconds.
    pub expires_at_ms: u128,
}

impl<T> StoredRecord<T> {
    /// Whether the record has expired at `now_ms`.
    pub const fn is_expired(&self, now_ms: u128) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Backend holding the latest schedule, a bounded history, and pool info.
///
/// Implementations must make `put_schedule` atomic with respect to
/// `get_schedule`: a reader sees either the previous schedule or the new
/// one in full. Writes for the same window key overwrite idempotently.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Store `schedule` under its window key and advance the current pointer.
    ///
    /// The current pointer never moves to an older window.
    async fn put_schedule(&self, schedule: &Schedule) -> Result<(), SchedulerError>;

    /// Read the current schedule or one for a specific window.
    ///
    /// `Ok(None)` means the window was never computed or has expired.
    async fn get_schedule(&self, key: ScheduleKey) -> Result<Option<Arc<Schedule>>, SchedulerError>;

    /// Store pool info with its own TTL, keyed by `info.consumer_id`.
    async fn put_pool_info(&self, info: PoolInfo, ttl: Duration) -> Result<(), SchedulerError>;

    /// Read unexpired pool info for a consumer.
    async fn get_pool_info(&self, consumer_id: &ConsumerId) -> Result<Option<PoolInfo>, SchedulerError>;

    /// Drop expired records; returns how many were removed.
    async fn purge_expired(&self, now_ms: u128) -> Result<usize, SchedulerError>;

    /// Window keys with a retained schedule, ascending.
    async fn window_keys(&self) -> Result<Vec<WindowKey>, SchedulerError>;
}
