//! Runtime adapters and the read API served to workers.

pub mod api;
pub mod handle;
pub mod tokio_spawner;

pub use api::{health, parse_schedule_key, Health, ScheduleReader};
pub use handle::{spawn_scheduler, SchedulerHandle};
pub use tokio_spawner::TokioSpawner;
