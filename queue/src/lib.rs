pub mod substrate;
pub mod work_queue;

pub use substrate::{JobRecord, JobState, MemorySubstrate, QueueSubstrate};
pub use work_queue::{JobHandler, QueueConfig, QueueMetricsSnapshot, WorkQueue};
