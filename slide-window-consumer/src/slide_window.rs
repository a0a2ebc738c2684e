use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::offset_committer::{OffsetCommitter, OffsetSink};

struct Inner {
    left_offset: i64,
    right_offset: i64,
    acks: HashMap<i64, bool>,
    waiting: bool,
    closed: bool,
}

/// Per-(topic, partition) bounded in-flight tracker.
///
/// Computes the contiguous-prefix commit offset and throttles producers (the shared dispatch
/// loop) that would exceed `window_size`. See SPEC_FULL.md §4.1 for the full contract; the
/// `waiting`/`closed` flags are guarded by the same mutex as the offset maps, which is the fix
/// for the data race the original Go source's `isWait` flag was exposed to.
pub struct SlideWindow {
    topic: String,
    partition: i32,
    window_size: i64,
    inner: Mutex<Inner>,
    notify: Notify,
    watermark_tx: Mutex<Option<mpsc::UnboundedSender<i64>>>,
    committer_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SlideWindow {
    /// Creates the window and spawns its dedicated [`OffsetCommitter`] task.
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        window_size: usize,
        initial_offset: i64,
        sink: Box<dyn OffsetSink>,
    ) -> std::sync::Arc<Self> {
        let topic = topic.into();
        let (watermark_tx, watermark_rx) = mpsc::unbounded_channel();

        let window = std::sync::Arc::new(Self {
            topic: topic.clone(),
            partition,
            window_size: window_size.max(1) as i64,
            inner: Mutex::new(Inner {
                left_offset: initial_offset - 1,
                right_offset: initial_offset - 1,
                acks: HashMap::new(),
                waiting: false,
                closed: false,
            }),
            notify: Notify::new(),
            watermark_tx: Mutex::new(Some(watermark_tx)),
            committer_handle: Mutex::new(None),
        });

        let committer = OffsetCommitter::new(topic, partition, sink);
        let handle = tokio::spawn(committer.run(watermark_rx));
        *window.committer_handle.lock().unwrap() = Some(handle);

        window
    }

    /// Suspends the caller until dispatching `offset` would not push the window's span past
    /// `window_size`. Calls on one partition must arrive in offset order — guaranteed by the
    /// single shared dispatch loop in [`crate::orchestrator`].
    pub async fn wait(&self, offset: i64) {
        let mut parked = false;
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.closed || offset <= inner.left_offset + self.window_size {
                    return;
                }
                inner.waiting = true;
            }
            if !parked {
                parked = true;
                metrics::counter!("slide_window_backpressure_total", "topic" => self.topic.clone())
                    .increment(1);
                debug!(
                    topic = %self.topic,
                    partition = self.partition,
                    offset,
                    "window full, parking until it slides"
                );
            }
            self.notify.notified().await;
        }
    }

    /// Records the result of offset `offset`, advances the contiguous watermark if possible,
    /// and wakes a parked `wait` caller if the slide freed capacity.
    pub fn mark_offset(&self, offset: i64, result: bool) {
        let mut advanced_watermark = None;
        let mut should_wake = false;

        {
            let mut inner = self.inner.lock().unwrap();
            inner.acks.insert(offset, result);
            if offset > inner.right_offset {
                inner.right_offset = offset;
            }

            if offset == inner.left_offset + 1 {
                let mut next = inner.left_offset + 1;
                while inner.acks.remove(&next).is_some() {
                    inner.left_offset = next;
                    next += 1;
                }
                advanced_watermark = Some(inner.left_offset + 1);

                if inner.waiting {
                    inner.waiting = false;
                    should_wake = true;
                }
            }
        }

        if let Some(watermark) = advanced_watermark {
            // The receiver side (OffsetCommitter) only ever disappears when we drop our own
            // sender in `close`, so a send error here can only mean we are racing our own
            // shutdown — safe to ignore.
            if let Some(tx) = self.watermark_tx.lock().unwrap().as_ref() {
                let _ = tx.send(watermark);
            }
        }
        if should_wake {
            self.notify.notify_one();
        }
    }

    /// Releases any parked waiter and signals the committer task to flush its pending watermark
    /// and exit. Called synchronously from the orchestrator's `pre_rebalance` (Cleanup) handler,
    /// so this never awaits the committer's exit — it runs down on its own, on the runtime, the
    /// moment its channel closes.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
        }
        self.notify.notify_waiters();

        // Dropping our sender closes the committer's channel, which makes it flush and exit
        // unconditionally (see OffsetCommitter::run).
        self.watermark_tx.lock().unwrap().take();
        self.committer_handle.lock().unwrap().take();

        debug!(topic = %self.topic, partition = self.partition, "closed slide window");
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> (i64, i64) {
        let inner = self.inner.lock().unwrap();
        (inner.left_offset, inner.right_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    #[derive(Default, Clone)]
    struct RecordingSink {
        stored: Arc<StdMutex<Vec<i64>>>,
    }

    impl OffsetSink for RecordingSink {
        fn store_offset(&self, _topic: &str, _partition: i32, offset: i64) -> Result<(), String> {
            self.stored.lock().unwrap().push(offset);
            Ok(())
        }
    }

    fn new_window(window_size: usize) -> (Arc<SlideWindow>, RecordingSink) {
        let sink = RecordingSink::default();
        let window = SlideWindow::new("orders", 0, window_size, 100, Box::new(sink.clone()));
        (window, sink)
    }

    #[tokio::test]
    async fn contiguous_slide_advances_left_offset() {
        let (window, _sink) = new_window(5);
        window.mark_offset(100, true);
        let (left, right) = window.snapshot();
        assert_eq!(left, 100);
        assert_eq!(right, 100);
    }

    #[tokio::test]
    async fn out_of_order_completion_waits_for_gap_to_fill() {
        let (window, _sink) = new_window(5);
        window.mark_offset(101, true); // leftOffset+1 is 100, so this doesn't slide yet
        let (left, right) = window.snapshot();
        assert_eq!(left, 99);
        assert_eq!(right, 101);

        window.mark_offset(100, true);
        let (left, right) = window.snapshot();
        assert_eq!(left, 101);
        assert_eq!(right, 101);
    }

    #[tokio::test]
    async fn scenario_s1_single_sequential_commits() {
        let (window, sink) = new_window(3);
        for offset in 100..105 {
            window.wait(offset).await;
            window.mark_offset(offset, true);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stored = sink.stored.lock().unwrap();
        assert_eq!(stored.last(), Some(&105));
        window.close();
    }

    #[tokio::test]
    async fn scenario_s2_out_of_order_watermarks_are_monotonic() {
        let (window, sink) = new_window(5);
        // new_window seeds initial_offset=100, so completions must land in the 100..110 range
        // for any of them to ever reach left_offset+1 and slide the window.
        let completion_order = [102, 100, 101, 104, 103, 109, 105, 106, 107, 108];
        for offset in completion_order {
            window.mark_offset(offset, true);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stored = sink.stored.lock().unwrap().clone();
        // every watermark we actually emitted must be strictly increasing
        for pair in stored.windows(2) {
            assert!(pair[1] > pair[0], "watermarks must be monotonic: {stored:?}");
        }
        assert_eq!(stored.last(), Some(&110));
        drop(stored);
        window.close();
    }

    #[tokio::test]
    async fn wait_blocks_when_window_is_full() {
        let (window, _sink) = new_window(2);
        // window_size=2, initial_offset=100 => leftOffset=99, so offsets 100 and 101 fit
        // without blocking.
        let mut fits = tokio_test::task::spawn(window.wait(100));
        assert!(fits.poll().is_ready());
        let mut fits = tokio_test::task::spawn(window.wait(101));
        assert!(fits.poll().is_ready());

        let mut blocked = tokio_test::task::spawn(window.wait(102));
        assert!(blocked.poll().is_pending(), "wait(102) should still be blocked");

        window.mark_offset(100, true); // slides leftOffset to 100, freeing one slot
        assert!(blocked.poll().is_ready(), "wait(102) should unblock once the window slides");

        window.close();
    }

    #[tokio::test]
    async fn scenario_s5_handler_failure_still_marks_offset_and_advances() {
        let (window, sink) = new_window(10);
        for offset in 0..100i64 {
            let result = offset != 50; // offset 50 "fails" but is still marked
            window.mark_offset(offset, result);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stored = sink.stored.lock().unwrap();
        assert_eq!(stored.last(), Some(&100));
        drop(stored);
        window.close();
    }

    #[tokio::test]
    async fn close_releases_a_parked_waiter() {
        let (window, _sink) = new_window(1);
        window.wait(100).await; // fills the single slot (leftOffset starts at 99)

        let window_for_wait = window.clone();
        let waited = tokio::spawn(async move {
            window_for_wait.wait(101).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waited.is_finished());

        window.close();
        tokio::time::timeout(Duration::from_millis(200), waited)
            .await
            .expect("close() must release parked waiters")
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_mark_offset_is_idempotent() {
        let (window, sink) = new_window(5);
        window.mark_offset(100, true);
        window.mark_offset(100, true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stored = sink.stored.lock().unwrap();
        assert_eq!(stored.as_slice(), &[101]);
        drop(stored);
        window.close();
    }
}
