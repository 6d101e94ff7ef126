//! Audit sink implementations.
//!
//! The audit feed is append-only: every computed schedule and every
//! superseded registry generation is recorded with a timestamp. Sinks are
//! provided for in-memory inspection, forwarding over a channel to an
//! external consumer, and JSON-lines files.

use std::collections::VecDeque;
use std::fs::{create_dir_all, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::util::clock::now_ms;
use crate::util::serde::WindowKey;

/// What an audit event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A schedule was computed (persisted or not).
    ScheduleComputed,
    /// A consumer registry generation was replaced by a newer one.
    RegistrySuperseded,
    /// Persisting a schedule failed after all retries.
    PersistFailed,
    /// A computed schedule was thrown away before persistence.
    ComputationDiscarded,
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Event kind.
    pub kind: AuditKind,
    /// Window the event relates to, if any.
    pub window_start: Option<WindowKey>,
    /// Registry generation the event relates to, if any.
    pub generation: Option<u64>,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// JSON-encoded body (schedule or consumer list).
    pub payload: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Audit sink shared between the registry and the scheduler loop.
pub type SharedAuditSink = Arc<Mutex<Box<dyn AuditSink>>>;

/// Wrap a sink for sharing.
pub fn shared_sink(sink: impl AuditSink + 'static) -> SharedAuditSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Events of a single kind, oldest first.
    pub fn events_of(&self, kind: AuditKind) -> Vec<AuditEvent> {
        self.events.iter().filter(|e| e.kind == kind).cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Forwards events to an external consumer over a bounded channel.
///
/// When the consumer falls behind, events are dropped and counted rather
/// than blocking the scheduler.
pub struct ChannelAuditSink {
    tx: Sender<AuditEvent>,
    dropped: u64,
}

impl ChannelAuditSink {
    /// Create a sink and the receiver the external consumer drains.
    pub fn bounded(capacity: usize) -> (Self, Receiver<AuditEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx, dropped: 0 }, rx)
    }

    /// Number of events dropped because the channel was full or closed.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&mut self, event: AuditEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                tracing::warn!(dropped = self.dropped, "audit channel full, event dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
                tracing::debug!("audit channel disconnected, event dropped");
            }
        }
    }
}

/// Append-only JSON-lines audit log.
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    /// Create a sink appending to `<dir>/<stream>_audit.jsonl`.
    pub fn new(dir: impl AsRef<Path>, stream: &str) -> Result<Self, SchedulerError> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(|e| SchedulerError::Backend(e.to_string()))?;
        Ok(Self {
            path: dir.join(format!("{stream}_audit.jsonl")),
        })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &AuditEvent) -> Result<(), SchedulerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let line =
            serde_json::to_string(event).map_err(|e| SchedulerError::Backend(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| SchedulerError::Backend(e.to_string()))
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if let Err(e) = self.append(&event) {
            tracing::error!("failed to append audit event: {}", e);
        }
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    kind: AuditKind,
    window_start: Option<WindowKey>,
    generation: Option<u64>,
    payload: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        kind,
        window_start,
        generation,
        created_at_ms: now_ms(),
        payload,
    }
}

/// Record into an optional shared sink.
pub(crate) fn emit(sink: Option<&SharedAuditSink>, event: AuditEvent) {
    if let Some(sink) = sink {
        sink.lock().record(event);
    }
}
