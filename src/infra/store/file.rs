//! File-backed schedule store using JSON lines for durability.
//!
//! Layout under the store directory:
//!
//! - `schedules.jsonl`: one stored schedule record per line, appended on write
//! - `pool_info.jsonl`: one pool-info record per line, appended on write
//! - `current.json`: the current schedule, replaced via write-then-rename
//!
//! On open the logs are replayed into an [`InMemoryScheduleStore`] which
//! then serves all reads. A torn trailing line left by a crash is skipped,
//! so a reader never observes a partially written schedule.
//!
//! `current.json` is the acknowledgement point for the current pointer: a
//! logged schedule newer than it was never reported as stored and is dropped
//! on replay. Writes run on the blocking pool so callers can bound them
//! with a timeout.

use std::fs::{self, create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

use crate::core::{PoolInfo, Schedule, ScheduleStore, SchedulerError, StoredRecord};
use crate::infra::store::memory::InMemoryScheduleStore;
use crate::util::clock::{expiry_ms, now_ms};
use crate::util::serde::{ConsumerId, ScheduleKey, WindowKey};

const SCHEDULES_FILE: &str = "schedules.jsonl";
const POOL_INFO_FILE: &str = "pool_info.jsonl";
const CURRENT_FILE: &str = "current.json";

fn persist_err(e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::StorePersist(e.to_string())
}

fn read_err(e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::StoreRead(e.to_string())
}

/// Durable store surviving process restarts.
pub struct FileScheduleStore {
    inner: Arc<FileStoreInner>,
}

struct FileStoreInner {
    path: PathBuf,
    cache: InMemoryScheduleStore,
    write_lock: Mutex<()>,
}

impl FileScheduleStore {
    /// Open (or create) a store rooted at `path` and replay its logs.
    pub fn open(
        path: impl AsRef<Path>,
        schedule_ttl: Duration,
        max_history: usize,
    ) -> Result<Self, SchedulerError> {
        let path = path.as_ref().to_path_buf();
        create_dir_all(&path).map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let inner = FileStoreInner {
            path,
            cache: InMemoryScheduleStore::new(schedule_ttl, max_history),
            write_lock: Mutex::new(()),
        };
        let now = now_ms();
        inner.load_from_disk(now)?;
        // Rewrite the logs so a torn tail never gets glued to the next append.
        inner.compact_sync(now)?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Directory holding the store files.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(&FileStoreInner) -> Result<T, SchedulerError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| SchedulerError::Backend(format!("store task failed: {e}")))?
    }
}

impl FileStoreInner {
    fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    fn read_current(&self) -> Result<Option<Schedule>, SchedulerError> {
        let current_path = self.file_path(CURRENT_FILE);
        if !current_path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&current_path).map_err(read_err)?;
        match serde_json::from_str::<Schedule>(&raw) {
            Ok(current) => Ok(Some(current)),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable current schedule pointer");
                Ok(None)
            }
        }
    }

    fn load_from_disk(&self, now: u128) -> Result<(), SchedulerError> {
        let current = self.read_current()?;
        let acknowledged = current.as_ref().map(Schedule::key);

        let mut restored = 0usize;
        for record in read_lines::<StoredRecord<Schedule>>(&self.file_path(SCHEDULES_FILE))? {
            if record.is_expired(now) {
                continue;
            }
            let key = record.value.key();
            if acknowledged.is_some_and(|k| key > k) {
                tracing::warn!(
                    window_start = key,
                    current = acknowledged,
                    "dropping schedule logged after the last acknowledged write"
                );
                continue;
            }
            let record = StoredRecord {
                value: Arc::new(record.value),
                stored_at_ms: record.stored_at_ms,
                expires_at_ms: record.expires_at_ms,
            };
            if acknowledged.is_some() {
                self.cache.restore_history(record);
            } else {
                self.cache.restore_schedule(record);
            }
            restored += 1;
        }
        if let Some(current) = current {
            self.cache.set_current(Arc::new(current));
        }

        for record in read_lines::<StoredRecord<PoolInfo>>(&self.file_path(POOL_INFO_FILE))? {
            if !record.is_expired(now) {
                self.cache.restore_pool_info(record);
            }
        }

        tracing::info!(
            path = %self.path.display(),
            schedules = restored,
            "schedule store loaded from disk"
        );
        Ok(())
    }

    fn put_schedule_sync(&self, schedule: &Schedule) -> Result<(), SchedulerError> {
        let _guard = self.write_lock.lock();
        let now = now_ms();
        let record = StoredRecord {
            value: schedule,
            stored_at_ms: now,
            expires_at_ms: expiry_ms(now, self.cache.schedule_ttl()),
        };
        append_line(&self.file_path(SCHEDULES_FILE), &record)?;

        let advances = self
            .cache
            .lookup_schedule(ScheduleKey::Current, now)
            .is_none_or(|c| c.key() <= schedule.key());
        if advances {
            write_atomic(&self.path, CURRENT_FILE, schedule)?;
        }

        self.cache.restore_schedule(StoredRecord {
            value: Arc::new(schedule.clone()),
            stored_at_ms: record.stored_at_ms,
            expires_at_ms: record.expires_at_ms,
        });
        Ok(())
    }

    fn put_pool_info_sync(&self, info: PoolInfo, ttl: Duration) -> Result<(), SchedulerError> {
        let _guard = self.write_lock.lock();
        let now = now_ms();
        let record = StoredRecord {
            value: info,
            stored_at_ms: now,
            expires_at_ms: expiry_ms(now, ttl),
        };
        append_line(&self.file_path(POOL_INFO_FILE), &record)?;
        self.cache.restore_pool_info(record);
        Ok(())
    }

    /// Drop expired records from memory and rewrite both logs.
    fn compact_sync(&self, now: u128) -> Result<usize, SchedulerError> {
        let _guard = self.write_lock.lock();
        let removed = self.cache.purge(now);

        let records = self.cache.schedule_records();
        let schedules: Vec<StoredRecord<&Schedule>> = records
            .iter()
            .map(|r| StoredRecord {
                value: r.value.as_ref(),
                stored_at_ms: r.stored_at_ms,
                expires_at_ms: r.expires_at_ms,
            })
            .collect();
        rewrite_lines(&self.path, SCHEDULES_FILE, &schedules)?;
        rewrite_lines(&self.path, POOL_INFO_FILE, &self.cache.pool_info_records())?;
        Ok(removed)
    }
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, SchedulerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(read_err)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(read_err)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(value) => out.push(value),
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = index + 1,
                error = %e,
                "skipping unreadable store record"
            ),
        }
    }
    Ok(out)
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<(), SchedulerError> {
    let line = serde_json::to_string(value).map_err(persist_err)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(persist_err)?;
    writeln!(file, "{line}").map_err(persist_err)?;
    file.sync_data().map_err(persist_err)
}

fn write_atomic<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), SchedulerError> {
    let tmp = dir.join(format!("{name}.tmp"));
    let body = serde_json::to_vec(value).map_err(persist_err)?;
    {
        let mut file = File::create(&tmp).map_err(persist_err)?;
        file.write_all(&body).map_err(persist_err)?;
        file.sync_data().map_err(persist_err)?;
    }
    fs::rename(&tmp, dir.join(name)).map_err(persist_err)
}

fn rewrite_lines<T: Serialize>(dir: &Path, name: &str, values: &[T]) -> Result<(), SchedulerError> {
    let tmp = dir.join(format!("{name}.tmp"));
    {
        let mut file = File::create(&tmp).map_err(persist_err)?;
        for value in values {
            let line = serde_json::to_string(value).map_err(persist_err)?;
            writeln!(file, "{line}").map_err(persist_err)?;
        }
        file.sync_data().map_err(persist_err)?;
    }
    fs::rename(&tmp, dir.join(name)).map_err(persist_err)
}

#[async_trait]
impl ScheduleStore for FileScheduleStore {
    async fn put_schedule(&self, schedule: &Schedule) -> Result<(), SchedulerError> {
        let schedule = schedule.clone();
        self.run_blocking(move |inner| inner.put_schedule_sync(&schedule))
            .await
    }

    async fn get_schedule(&self, key: ScheduleKey) -> Result<Option<Arc<Schedule>>, SchedulerError> {
        Ok(self.inner.cache.lookup_schedule(key, now_ms()))
    }

    async fn put_pool_info(&self, info: PoolInfo, ttl: Duration) -> Result<(), SchedulerError> {
        self.run_blocking(move |inner| inner.put_pool_info_sync(info, ttl))
            .await
    }

    async fn get_pool_info(&self, consumer_id: &ConsumerId) -> Result<Option<PoolInfo>, SchedulerError> {
        Ok(self.inner.cache.lookup_pool_info(consumer_id, now_ms()))
    }

    async fn purge_expired(&self, now_ms: u128) -> Result<usize, SchedulerError> {
        let removed = self
            .run_blocking(move |inner| inner.compact_sync(now_ms))
            .await?;
        if removed > 0 {
            tracing::debug!(removed, "compacted schedule store logs");
        }
        Ok(removed)
    }

    async fn window_keys(&self) -> Result<Vec<WindowKey>, SchedulerError> {
        Ok(self.inner.cache.keys())
    }
}
