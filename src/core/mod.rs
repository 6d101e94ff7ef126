//! Core scheduling abstractions: consumers, windows, policies, schedules,
//! persistence traits, and the scheduler loop.

pub mod audit;
pub mod error;
pub mod policy;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod window;

pub use audit::{
    build_audit_event, shared_sink, AuditEvent, AuditKind, AuditSink, ChannelAuditSink,
    InMemoryAuditSink, JsonlAuditSink, SharedAuditSink,
};
pub use error::{AppResult, SchedulerError};
pub use policy::{
    build_schedule, Allocation, AllocationPolicy, EqualDistribution, PolicyKind, PolicyParams,
    Share, StakeProportional,
};
pub use registry::{
    sort_consumers, Consumer, ConsumerRegistry, RefreshOutcome, RegistryGeneration, StakeSource,
    TieBreak,
};
pub use schedule::{AllocationEntry, AllocationStatus, PolicyDescriptor, Schedule};
pub use scheduler::{
    AllocationScheduler, CycleOutcome, RecomputeReason, SchedulerPhase, SchedulerStatus, Spawn,
};
pub use store::{PoolInfo, ScheduleStore, StoredRecord};
pub use window::{BlockSource, CapacityWindow, WindowClock, WindowTransition};
