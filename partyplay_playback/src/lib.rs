pub mod cache;
pub mod probe;
pub mod scheduler;

pub use cache::{CacheError, CachePipeline};
pub use scheduler::{PlaybackScheduler, QueueError, SchedulerHandle};
