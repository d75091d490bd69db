pub mod ranked_queue;

pub use ranked_queue::{QueueEntry, RankedQueue, VoteTarget};
