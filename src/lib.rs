//! # Capacity Scheduler
//!
//! A time-windowed allocation scheduler that splits a miner's work capacity
//! across competing consumers (validators), weighted by stake, while
//! honoring per-consumer minimum guarantees.
//!
//! ## Core Problem Solved
//!
//! Stake figures drift block to block, yet workers need a stable answer to
//! "who owns which slice of capacity right now":
//!
//! - **Deterministic allocation**: identical consumer snapshots always yield
//!   the same schedule, so every schedule is auditable
//! - **Exact partition**: entries are contiguous and sum to the window's
//!   capacity, no unit dropped or assigned twice
//! - **Availability over freshness**: store outages never block the loop;
//!   the last persisted schedule keeps being served
//! - **Restart recovery**: the file-backed store reloads the current
//!   schedule on startup
//!
//! ## Components
//!
//! - [`core::ConsumerRegistry`]: generation-swapped consumer set
//! - [`core::StakeProportional`] / [`core::EqualDistribution`]: built-in policies
//! - [`core::WindowClock`]: block height to window mapping
//! - [`core::ScheduleStore`]: persistence trait, with in-memory and file backends in [`infra`]
//! - [`core::AllocationScheduler`]: the recompute/persist/serve loop
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use capacity_scheduler::builders::SchedulerBuilder;
//! use capacity_scheduler::config::SchedulerConfig;
//! use capacity_scheduler::runtime::{spawn_scheduler, ScheduleReader, TokioSpawner};
//!
//! let config = SchedulerConfig::from_env(None)?;
//! let scheduler = Arc::new(SchedulerBuilder::new(config).build(stake_feed, block_feed)?);
//! let reader = ScheduleReader::new(Arc::clone(scheduler.store()));
//! let handle = spawn_scheduler(scheduler, &TokioSpawner::current());
//!
//! let current = reader.get_schedule_by_name("current").await?;
//! handle.stop(std::time::Duration::from_secs(5)).await?;
//! ```

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions and the scheduler loop.
pub mod core;
/// Configuration models for the scheduler and its backends.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Infrastructure adapters for schedule storage backends.
pub mod infra;
/// Runtime adapters and the read API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
