use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::error;

use crate::handler::TopicHandler;
use crate::message::KafkaMessage;
use crate::slide_window::SlideWindow;

use super::{TopicWorker, PANIC_COOL_OFF};

/// A bounded worker pool shared across every partition of one topic.
///
/// `process_message` waits for the partition's window to have room, then waits for a free pool
/// slot (a semaphore sized `max_concurrency`), then spawns a task to run the handler. Message
/// ordering across the topic is not preserved — only per-partition commit order, via
/// [`SlideWindow`], is.
pub struct PoolWorker {
    topic: String,
    handler: Arc<dyn TopicHandler>,
    semaphore: Arc<Semaphore>,
    windows: Mutex<HashMap<i32, Arc<SlideWindow>>>,
}

impl PoolWorker {
    pub fn new(topic: impl Into<String>, max_concurrency: usize, handler: Arc<dyn TopicHandler>) -> Self {
        Self {
            topic: topic.into(),
            handler,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            windows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TopicWorker for PoolWorker {
    fn attach_window(&self, partition: i32, window: Arc<SlideWindow>) {
        self.windows.lock().unwrap().insert(partition, window);
    }

    async fn process_message(&self, message: KafkaMessage) {
        let window = self.windows.lock().unwrap().get(&message.partition).cloned();
        let Some(window) = window else {
            error!(
                topic = %self.topic,
                partition = message.partition,
                "no slide window attached for partition, dropping message"
            );
            return;
        };

        window.wait(message.offset).await;

        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                // Semaphore only closes if we drop it, which we never do while the worker is
                // alive; treat this as a submission failure per §7: the offset is NOT marked,
                // so the message is redelivered on the next claim.
                error!(
                    topic = %self.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "pool submission failed, offset left unmarked for redelivery"
                );
                return;
            }
        };

        let handler = self.handler.clone();
        let topic = self.topic.clone();
        let offset = message.offset;
        let partition = message.partition;
        let key = message.key.clone();

        tokio::spawn(async move {
            let _permit = permit;

            let handled = tokio::spawn(async move { handler.handle(&message).await }).await;

            let success = match handled {
                Ok(Ok(())) => true,
                Ok(Err(err)) => {
                    error!(
                        topic = %topic,
                        partition,
                        offset,
                        key = ?key,
                        error = %err,
                        "handler returned an error"
                    );
                    false
                }
                Err(join_err) => {
                    error!(
                        topic = %topic,
                        partition,
                        offset,
                        key = ?key,
                        panic = %join_err,
                        "handler panicked, cooling off before resuming"
                    );
                    tokio::time::sleep(PANIC_COOL_OFF).await;
                    false
                }
            };

            window.mark_offset(offset, success);
        });
    }

    fn release(&self) {
        let mut windows = self.windows.lock().unwrap();
        for window in windows.values() {
            window.close();
        }
        windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::test_message;
    use crate::offset_committer::OffsetSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NoopSink;
    impl OffsetSink for NoopSink {
        fn store_offset(&self, _topic: &str, _partition: i32, _offset: i64) -> Result<(), String> {
            Ok(())
        }
    }

    /// Tracks how many calls are executing at once, recording the high-water mark.
    struct ConcurrencyProbe {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TopicHandler for ConcurrencyProbe {
        async fn handle(&self, _message: &KafkaMessage) -> Result<(), crate::error::HandlerError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn never_exceeds_max_concurrency() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(ConcurrencyProbe {
            current: current.clone(),
            peak: peak.clone(),
        });

        let worker = PoolWorker::new("orders", 3, handler);
        let window = SlideWindow::new("orders", 0, 100, 0, Box::new(NoopSink));
        worker.attach_window(0, window.clone());

        for offset in 0..20i64 {
            let message = test_message("orders", 0, offset, "any");
            worker.process_message(message).await;
        }
        // wait for every spawned handler task to complete
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(peak.load(Ordering::SeqCst) <= 3, "peak concurrency exceeded the pool size");
        assert_eq!(current.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_error_still_advances_the_window() {
        struct FailingHandler;
        #[async_trait]
        impl TopicHandler for FailingHandler {
            async fn handle(&self, _message: &KafkaMessage) -> Result<(), crate::error::HandlerError> {
                Err("boom".into())
            }
        }

        let worker = PoolWorker::new("orders", 2, Arc::new(FailingHandler));
        let window = SlideWindow::new("orders", 0, 5, 0, Box::new(NoopSink));
        worker.attach_window(0, window.clone());

        for offset in 0..5i64 {
            let message = test_message("orders", 0, offset, "any");
            worker.process_message(message).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // window_size is 5 and we never marked offsets before this point would deadlock; a
        // further wait() proves the earlier offsets were all marked despite the handler failing.
        window.wait(5).await;
        worker.release();
    }
}
