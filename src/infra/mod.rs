//! Infrastructure adapters for schedule storage backends.

pub mod store;

pub use store::{FileScheduleStore, InMemoryScheduleStore};
