//! Scheduler loop: recomputes and persists the schedule on window
//! boundaries and on demand, while serving the last persisted schedule.
//!
//! Phases run `Idle -> Computing -> Persisting -> Serving`, returning to
//! `Computing` at the next boundary. Only one cycle runs at a time; readers
//! go through a lock-free cache of the last schedule that reached the store.
//! Recoverable failures (stake refresh, store writes, block polling) are
//! logged and absorbed here; they never stop the loop.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::audit::{build_audit_event, emit, AuditKind, SharedAuditSink};
use crate::core::policy::{build_schedule, AllocationPolicy};
use crate::core::registry::{ConsumerRegistry, RefreshOutcome, StakeSource};
use crate::core::schedule::Schedule;
use crate::core::store::{PoolInfo, ScheduleStore};
use crate::core::window::{BlockSource, CapacityWindow, WindowClock, WindowTransition};
use crate::core::SchedulerError;
use crate::util::clock::now_ms;
use crate::util::serde::{ScheduleKey, WindowKey};

/// Abstraction for spawning the loop on a runtime.
pub trait Spawn {
    /// Spawn an async task.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Lifecycle phase of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    /// Nothing persisted yet.
    Idle,
    /// Building a schedule from a registry snapshot.
    Computing,
    /// Writing a schedule to the store.
    Persisting,
    /// Serving the last persisted schedule.
    Serving,
    /// Stopped by an external signal.
    Stopped,
}

/// Why a cycle ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeReason {
    /// A new window began.
    WindowBoundary,
    /// The registry changed materially between boundaries.
    RegistryChanged,
    /// Explicitly requested.
    OnDemand,
}

/// What a cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A new schedule was persisted and is now served.
    Persisted(Arc<Schedule>),
    /// The computed schedule matched the one already served; nothing written.
    Unchanged(WindowKey),
    /// The block height did not enter a new window.
    NoNewWindow,
    /// The block source could not be read.
    BlockUnavailable,
    /// No consumer snapshot has ever been loaded.
    AwaitingRegistry,
    /// The computed schedule was thrown away.
    Discarded {
        /// Window the schedule was computed for.
        window_start: WindowKey,
        /// Why it was discarded.
        reason: String,
    },
    /// Every persist attempt failed; the previous schedule is still served.
    PersistFailed(WindowKey),
}

/// Point-in-time view of the loop for health checks and dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Current phase.
    pub phase: SchedulerPhase,
    /// Latest window observed from the block source.
    pub current_window: Option<WindowKey>,
    /// Window of the schedule being served.
    pub serving_window: Option<WindowKey>,
    /// When the served schedule was computed.
    pub serving_computed_at_ms: Option<u128>,
    /// Registry generation in effect.
    pub registry_generation: u64,
    /// Latest block height seen.
    pub last_height: u64,
    /// Schedules persisted since start.
    pub schedules_persisted: u64,
    /// Persist failures since the last success.
    pub consecutive_persist_failures: u64,
    /// Computations rejected for breaking invariants.
    pub policy_violations: u64,
    /// Stake refreshes that failed or timed out.
    pub refresh_failures: u64,
    /// The served schedule belongs to an older window than the current one.
    pub stale: bool,
}

#[derive(Default)]
struct Counters {
    last_height: AtomicU64,
    schedules_persisted: AtomicU64,
    consecutive_persist_failures: AtomicU64,
    policy_violations: AtomicU64,
    refresh_failures: AtomicU64,
}

/// Bound `fut` by `bound`, reporting expiry as [`SchedulerError::Timeout`].
pub(crate) async fn with_timeout<T>(
    operation: &'static str,
    bound: Duration,
    fut: impl Future<Output = T>,
) -> Result<T, SchedulerError> {
    tokio::time::timeout(bound, fut)
        .await
        .map_err(|_| SchedulerError::Timeout {
            operation,
            timeout_ms: u64::try_from(bound.as_millis()).unwrap_or(u64::MAX),
        })
}

enum PersistFailure {
    Superseded(WindowKey),
    Exhausted(SchedulerError),
}

/// Orchestrates registry refresh, allocation, and persistence.
pub struct AllocationScheduler {
    config: SchedulerConfig,
    policy: Box<dyn AllocationPolicy>,
    registry: Arc<ConsumerRegistry>,
    store: Arc<dyn ScheduleStore>,
    stakes: Arc<dyn StakeSource>,
    blocks: Arc<dyn BlockSource>,
    audit: Option<SharedAuditSink>,
    clock: parking_lot::Mutex<WindowClock>,
    cycle: tokio::sync::Mutex<()>,
    serving: ArcSwapOption<Schedule>,
    phase: watch::Sender<SchedulerPhase>,
    trigger: Notify,
    counters: Counters,
}

impl AllocationScheduler {
    /// Create a scheduler using the policy selected in `config`.
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<ConsumerRegistry>,
        store: Arc<dyn ScheduleStore>,
        stakes: Arc<dyn StakeSource>,
        blocks: Arc<dyn BlockSource>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::Config)?;
        let clock = WindowClock::new(
            config.window_length,
            config.window_origin,
            config.capacity_per_window,
            config.min_guarantee,
        )?;
        let (phase, _) = watch::channel(SchedulerPhase::Idle);
        Ok(Self {
            policy: config.policy.build(),
            config,
            registry,
            store,
            stakes,
            blocks,
            audit: None,
            clock: parking_lot::Mutex::new(clock),
            cycle: tokio::sync::Mutex::new(()),
            serving: ArcSwapOption::empty(),
            phase,
            trigger: Notify::new(),
            counters: Counters::default(),
        })
    }

    /// Replace the configured policy with a custom one.
    #[must_use]
    pub fn with_policy(mut self, policy: Box<dyn AllocationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Attach an audit sink for computed schedules and failures.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Configuration in effect.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Registry the scheduler reads consumers from.
    pub fn registry(&self) -> &Arc<ConsumerRegistry> {
        &self.registry
    }

    /// Store the scheduler writes to.
    pub fn store(&self) -> &Arc<dyn ScheduleStore> {
        &self.store
    }

    /// Last schedule that reached the store, served even if the store is down.
    pub fn serving_schedule(&self) -> Option<Arc<Schedule>> {
        self.serving.load_full()
    }

    /// Current phase.
    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.borrow()
    }

    /// Subscribe to phase changes.
    pub fn subscribe_phase(&self) -> watch::Receiver<SchedulerPhase> {
        self.phase.subscribe()
    }

    /// Ask the running loop to recompute at its next opportunity.
    pub fn request_recompute(&self) {
        self.trigger.notify_one();
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(?previous, ?phase, "scheduler phase changed");
        }
    }

    fn settle_phase(&self) {
        if self.serving.load().is_some() {
            self.set_phase(SchedulerPhase::Serving);
        } else {
            self.set_phase(SchedulerPhase::Idle);
        }
    }

    /// Load the current schedule from the store into the serving cache.
    ///
    /// The restored window is marked as observed so the first tick inside
    /// it does not recompute.
    pub async fn restore(&self) -> Result<Option<Arc<Schedule>>, SchedulerError> {
        let restored = with_timeout(
            "store read",
            self.config.store_timeout(),
            self.store.get_schedule(ScheduleKey::Current),
        )
        .await??;

        if let Some(schedule) = &restored {
            self.clock.lock().advance(schedule.window.start);
            self.serving.store(Some(Arc::clone(schedule)));
            info!(
                window_start = schedule.window.start,
                entries = schedule.entries.len(),
                "restored current schedule from store"
            );
        }
        self.settle_phase();
        Ok(restored)
    }

    async fn poll_height(&self) -> Result<u64, SchedulerError> {
        let height = with_timeout(
            "block poll",
            self.config.block_poll_timeout(),
            self.blocks.current_block(),
        )
        .await??;
        self.counters.last_height.fetch_max(height, Ordering::AcqRel);
        Ok(height)
    }

    /// Pull the stake feed and publish a new registry generation.
    ///
    /// On failure or timeout the previous generation stays in effect.
    pub async fn refresh_registry(&self) -> Result<RefreshOutcome, SchedulerError> {
        let result = with_timeout(
            "stake refresh",
            self.config.refresh_timeout(),
            self.registry.refresh(self.stakes.as_ref()),
        )
        .await
        .and_then(|r| r);

        match &result {
            Ok(outcome) => debug!(
                generation = outcome.generation,
                material_change = outcome.material_change,
                "consumer registry refreshed"
            ),
            Err(e) => {
                self.counters.refresh_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %e,
                    generation = self.registry.snapshot().generation,
                    "registry refresh failed; keeping last known-good snapshot"
                );
            }
        }
        result
    }

    /// Poll the block source and recompute if a new window began.
    pub async fn tick(&self) -> CycleOutcome {
        let height = match self.poll_height().await {
            Ok(height) => height,
            Err(e) => {
                warn!(error = %e, "block source unavailable; serving current schedule");
                return CycleOutcome::BlockUnavailable;
            }
        };

        let transition = self.clock.lock().advance(height);
        match transition {
            WindowTransition::Advanced { window, skipped } => {
                if skipped > 0 {
                    info!(
                        window_start = window.start,
                        skipped, "block height jumped; missed windows are not backfilled"
                    );
                }
                self.run_cycle(window, RecomputeReason::WindowBoundary).await
            }
            WindowTransition::Unchanged(_) => CycleOutcome::NoNewWindow,
            WindowTransition::Regressed { height, current } => {
                warn!(
                    height,
                    window_start = current.start,
                    "block height moved backwards; ignoring"
                );
                CycleOutcome::NoNewWindow
            }
        }
    }

    /// Recompute the schedule for the latest observed window.
    pub async fn recompute(&self, reason: RecomputeReason) -> CycleOutcome {
        let last = self.clock.lock().last_window();
        let window = match last {
            Some(window) => window,
            None => return self.tick().await,
        };
        self.run_cycle(window, reason).await
    }

    async fn run_cycle(&self, window: CapacityWindow, reason: RecomputeReason) -> CycleOutcome {
        let _cycle = self.cycle.lock().await;

        let latest = self.clock.lock().last_window().map_or(window.start, |w| w.start);
        if window.start < latest {
            return self.discard(window.start, format!("superseded by window {latest}"));
        }

        self.set_phase(SchedulerPhase::Computing);
        if reason == RecomputeReason::WindowBoundary {
            // Failures are logged inside; the last snapshot is used either way.
            let _ = self.refresh_registry().await;
        }
        let snapshot = self.registry.snapshot();
        if snapshot.generation == 0 {
            warn!(
                window_start = window.start,
                "no consumer snapshot loaded yet; skipping computation"
            );
            self.settle_phase();
            return CycleOutcome::AwaitingRegistry;
        }

        let schedule = match build_schedule(self.policy.as_ref(), window, &snapshot, now_ms()) {
            Ok(schedule) => schedule,
            Err(e) => {
                self.counters.policy_violations.fetch_add(1, Ordering::Relaxed);
                error!(
                    error = %e,
                    window_start = window.start,
                    generation = snapshot.generation,
                    "allocation failed consistency check; discarding computation"
                );
                return self.discard(window.start, e.to_string());
            }
        };

        emit(
            self.audit.as_ref(),
            build_audit_event(
                AuditKind::ScheduleComputed,
                Some(window.start),
                Some(snapshot.generation),
                serde_json::to_string(&schedule).ok(),
            ),
        );

        if let Some(serving) = self.serving.load_full() {
            if serving.same_allocation(&schedule) {
                debug!(
                    window_start = window.start,
                    ?reason,
                    "recomputed schedule is identical; skipping write"
                );
                self.settle_phase();
                return CycleOutcome::Unchanged(window.start);
            }
            if serving.window.start > window.start {
                return self.discard(
                    window.start,
                    format!("older than served window {}", serving.window.start),
                );
            }
        }

        self.set_phase(SchedulerPhase::Persisting);
        match self.persist_with_retry(&schedule).await {
            Ok(attempts) => {
                let schedule = Arc::new(schedule);
                self.serving.store(Some(Arc::clone(&schedule)));
                self.counters.schedules_persisted.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .consecutive_persist_failures
                    .store(0, Ordering::Relaxed);
                info!(
                    window_start = window.start,
                    generation = snapshot.generation,
                    entries = schedule.entries.len(),
                    status = ?schedule.status,
                    attempts,
                    ?reason,
                    "schedule persisted"
                );
                self.set_phase(SchedulerPhase::Serving);
                CycleOutcome::Persisted(schedule)
            }
            Err(PersistFailure::Superseded(newer)) => {
                self.discard(window.start, format!("window {newer} began before persistence"))
            }
            Err(PersistFailure::Exhausted(e)) => {
                let failures = self
                    .counters
                    .consecutive_persist_failures
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                error!(
                    error = %e,
                    window_start = window.start,
                    consecutive_failures = failures,
                    "giving up on persisting schedule; serving previous schedule"
                );
                emit(
                    self.audit.as_ref(),
                    build_audit_event(
                        AuditKind::PersistFailed,
                        Some(window.start),
                        Some(snapshot.generation),
                        Some(e.to_string()),
                    ),
                );
                self.settle_phase();
                CycleOutcome::PersistFailed(window.start)
            }
        }
    }

    fn discard(&self, window_start: WindowKey, reason: String) -> CycleOutcome {
        warn!(window_start, reason = %reason, "discarding computed schedule");
        emit(
            self.audit.as_ref(),
            build_audit_event(
                AuditKind::ComputationDiscarded,
                Some(window_start),
                None,
                Some(reason.clone()),
            ),
        );
        self.settle_phase();
        CycleOutcome::Discarded {
            window_start,
            reason,
        }
    }

    /// Window newer than `window` seen at the block source, if any.
    ///
    /// Detection only: the clock is left for the next tick to advance.
    async fn newer_window(&self, window: &CapacityWindow) -> Option<WindowKey> {
        let height = self.poll_height().await.ok()?;
        let observed = self.clock.lock().current_window(height);
        (observed.start > window.start).then_some(observed.start)
    }

    async fn persist_with_retry(&self, schedule: &Schedule) -> Result<u32, PersistFailure> {
        let max_attempts = self.config.persist_max_attempts;
        let mut delay = self.config.persist_backoff();
        let mut last_error = SchedulerError::StorePersist("no attempt made".into());

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                if let Some(newer) = self.newer_window(&schedule.window).await {
                    return Err(PersistFailure::Superseded(newer));
                }
            }

            match with_timeout(
                "store write",
                self.config.store_timeout(),
                self.store.put_schedule(schedule),
            )
            .await
            .and_then(|r| r)
            {
                Ok(()) => return Ok(attempt),
                Err(e) => last_error = e,
            }
            warn!(
                attempt,
                max_attempts,
                window_start = schedule.window.start,
                error = %last_error,
                "schedule persist attempt failed"
            );

            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2).min(self.config.persist_backoff_max());
            }
        }
        Err(PersistFailure::Exhausted(last_error))
    }

    /// Write pool info using the configured default TTL.
    pub async fn publish_pool_info(&self, info: PoolInfo) -> Result<(), SchedulerError> {
        with_timeout(
            "store write",
            self.config.store_timeout(),
            self.store.put_pool_info(info, self.config.pool_info_ttl()),
        )
        .await?
    }

    /// Drop expired store records.
    pub async fn purge_expired(&self) -> Result<usize, SchedulerError> {
        with_timeout(
            "store purge",
            self.config.store_timeout(),
            self.store.purge_expired(now_ms()),
        )
        .await?
    }

    /// Snapshot of loop state.
    pub fn status(&self) -> SchedulerStatus {
        let serving = self.serving.load_full();
        let current_window = self.clock.lock().last_window().map(|w| w.start);
        let serving_window = serving.as_ref().map(|s| s.window.start);
        SchedulerStatus {
            phase: self.phase(),
            current_window,
            serving_window,
            serving_computed_at_ms: serving.as_ref().map(|s| s.computed_at_ms),
            registry_generation: self.registry.snapshot().generation,
            last_height: self.counters.last_height.load(Ordering::Acquire),
            schedules_persisted: self.counters.schedules_persisted.load(Ordering::Relaxed),
            consecutive_persist_failures: self
                .counters
                .consecutive_persist_failures
                .load(Ordering::Relaxed),
            policy_violations: self.counters.policy_violations.load(Ordering::Relaxed),
            refresh_failures: self.counters.refresh_failures.load(Ordering::Relaxed),
            stale: matches!((serving_window, current_window), (Some(s), Some(c)) if s < c),
        }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            policy = self.policy.name(),
            window_length = self.config.window_length,
            capacity = self.config.capacity_per_window,
            "starting allocation scheduler"
        );
        if let Err(e) = self.restore().await {
            warn!(error = %e, "could not restore schedule from store");
        }
        if let Err(e) = self.refresh_registry().await {
            debug!(error = %e, "initial registry refresh failed");
        }

        let mut poll = tokio::time::interval(self.config.block_poll_interval());
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut refresh = tokio::time::interval(self.config.refresh_interval());
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        refresh.tick().await;
        let purge_every = self.config.schedule_ttl().max(Duration::from_secs(1));
        let mut purge = tokio::time::interval(purge_every);
        purge.tick().await;

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.tick().await;
                }
                _ = refresh.tick() => {
                    if let Ok(outcome) = self.refresh_registry().await {
                        if outcome.material_change {
                            self.recompute(RecomputeReason::RegistryChanged).await;
                        }
                    }
                }
                () = self.trigger.notified() => {
                    self.recompute(RecomputeReason::OnDemand).await;
                }
                _ = purge.tick() => {
                    if let Err(e) = self.purge_expired().await {
                        warn!(error = %e, "store purge failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.set_phase(SchedulerPhase::Stopped);
        info!("allocation scheduler stopped");
    }
}
