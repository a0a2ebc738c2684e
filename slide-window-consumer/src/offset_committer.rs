use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

const BATCH_SIZE: usize = 10;
const BATCH_INTERVAL: Duration = Duration::from_secs(1);

/// The write side of a partition's committed offset.
///
/// Implemented for the real `rdkafka` consumer handle in [`crate::orchestrator`]; test code
/// supplies an in-memory double so the batching logic can be exercised without a broker.
pub trait OffsetSink: Send + Sync {
    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<(), String>;
}

/// Coalesces watermark updates from a single [`crate::slide_window::SlideWindow`] into batched
/// `store_offset` calls.
///
/// Because the watermark is monotonic (invariant 5 of the SlideWindow contract), remembering
/// only the most recently received value in a batch is lossless: storing offset `X` implies
/// every smaller offset on the partition is already accounted for.
pub struct OffsetCommitter {
    topic: String,
    partition: i32,
    sink: Box<dyn OffsetSink>,
}

impl OffsetCommitter {
    pub fn new(topic: String, partition: i32, sink: Box<dyn OffsetSink>) -> Self {
        Self {
            topic,
            partition,
            sink,
        }
    }

    /// Drives the batching loop until `watermarks` closes. On close, any pending watermark is
    /// flushed unconditionally before returning — the original Go source only flushed a
    /// trailing batch if its cursor was non-zero at the moment the channel closed, which could
    /// leak the task on a spuriously empty close. Flushing unconditionally here removes that
    /// distinction entirely: there is simply nothing left to do once the receiver is drained.
    pub async fn run(mut self, mut watermarks: mpsc::UnboundedReceiver<i64>) {
        let mut pending: Option<i64> = None;
        let mut batch_len = 0usize;
        let mut ticker = tokio::time::interval(BATCH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately; consume it so the interval is real

        loop {
            tokio::select! {
                biased;

                maybe_watermark = watermarks.recv() => {
                    match maybe_watermark {
                        Some(watermark) => {
                            pending = Some(watermark);
                            batch_len += 1;
                            if batch_len >= BATCH_SIZE {
                                self.flush(&mut pending);
                                batch_len = 0;
                            }
                        }
                        None => {
                            self.flush(&mut pending);
                            debug!(topic = %self.topic, partition = self.partition, "offset committer channel closed, exiting");
                            return;
                        }
                    }
                }

                _ = ticker.tick() => {
                    if pending.is_some() {
                        self.flush(&mut pending);
                        batch_len = 0;
                    }
                }
            }
        }
    }

    fn flush(&self, pending: &mut Option<i64>) {
        let Some(offset) = pending.take() else {
            return;
        };
        if let Err(err) = self.sink.store_offset(&self.topic, self.partition, offset) {
            warn!(
                topic = %self.topic,
                partition = self.partition,
                offset,
                error = %err,
                "failed to store offset"
            );
        } else {
            metrics::counter!("slide_window_offsets_stored_total", "topic" => self.topic.clone())
                .increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingSink {
        stored: Arc<Mutex<Vec<(String, i32, i64)>>>,
    }

    impl OffsetSink for RecordingSink {
        fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<(), String> {
            self.stored
                .lock()
                .unwrap()
                .push((topic.to_string(), partition, offset));
            Ok(())
        }
    }

    #[tokio::test]
    async fn flushes_after_ten_watermarks() {
        let sink = RecordingSink::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let committer = OffsetCommitter::new("orders".into(), 0, Box::new(sink.clone()));
        let handle = tokio::spawn(committer.run(rx));

        for i in 1..=10 {
            tx.send(i).unwrap();
        }
        // give the task a chance to drain the channel before we close it
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);
        handle.await.unwrap();

        let stored = sink.stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], ("orders".to_string(), 0, 10));
    }

    #[tokio::test]
    async fn flushes_pending_watermark_on_close_even_below_batch_size() {
        let sink = RecordingSink::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let committer = OffsetCommitter::new("orders".into(), 1, Box::new(sink.clone()));
        let handle = tokio::spawn(committer.run(rx));

        tx.send(3).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*sink.stored.lock().unwrap(), vec![("orders".to_string(), 1, 3)]);
    }

    #[tokio::test]
    async fn exits_cleanly_when_closed_with_nothing_pending() {
        let sink = RecordingSink::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let committer = OffsetCommitter::new("orders".into(), 2, Box::new(sink.clone()));
        let handle = tokio::spawn(committer.run(rx));

        drop(tx);
        handle.await.unwrap();

        assert!(sink.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn flushes_on_one_second_timer_while_idle() {
        let sink = RecordingSink::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let committer = OffsetCommitter::new("orders".into(), 0, Box::new(sink.clone()));
        let handle = tokio::spawn(committer.run(rx));

        tx.send(1).unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(*sink.stored.lock().unwrap(), vec![("orders".to_string(), 0, 1)]);

        drop(tx);
        handle.await.unwrap();
    }
}
