//! Schedule store backends.

pub mod file;
pub mod memory;

pub use file::FileScheduleStore;
pub use memory::InMemoryScheduleStore;
