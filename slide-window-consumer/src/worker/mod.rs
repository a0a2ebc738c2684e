mod key_partition;
mod pool;
mod single;

pub use key_partition::KeyPartitionWorker;
pub use pool::PoolWorker;
pub use single::SingleWorker;

use std::sync::Arc;

use async_trait::async_trait;

use crate::message::KafkaMessage;
use crate::slide_window::SlideWindow;

/// Common capability set shared by the three concurrency-strategy implementations. Dispatch
/// between them is decided once, at first-assignment time, per topic (see
/// `TopicRegistration::is_single` and [`crate::orchestrator`]).
#[async_trait]
pub trait TopicWorker: Send + Sync {
    /// Binds the SlideWindow for a newly-assigned partition. Must be called before any message
    /// for that partition reaches `process_message`.
    fn attach_window(&self, partition: i32, window: Arc<SlideWindow>);

    /// Dispatches one message for processing. Must be called in offset order per partition.
    async fn process_message(&self, message: KafkaMessage);

    /// Releases all worker resources (tasks, channels). Called once per rebalance, from
    /// `pre_rebalance` (Cleanup) — synchronously, since that callback runs outside any async
    /// context.
    fn release(&self);
}

/// Sleep issued after a panicking handler task before the worker resumes accepting work —
/// throttles a pathological tight loop if every message in a batch panics.
pub(crate) const PANIC_COOL_OFF: std::time::Duration = std::time::Duration::from_secs(2);
