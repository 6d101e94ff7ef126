//! Configuration models for the scheduler, its store, and its timeouts.

pub mod scheduler;

pub use scheduler::{SchedulerConfig, StoreBackendConfig};
