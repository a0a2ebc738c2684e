use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};
use std::sync::{Arc, Mutex};

use ahash::RandomState;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::error;

use crate::handler::TopicHandler;
use crate::message::KafkaMessage;
use crate::slide_window::SlideWindow;

use super::{TopicWorker, PANIC_COOL_OFF};

struct RoutedMessage {
    message: KafkaMessage,
    window: Arc<SlideWindow>,
}

/// Serializes handling by key: a fixed array of `max_concurrency` single-consumer channels,
/// each with one long-lived worker task. A message is routed deterministically by hashing its
/// key modulo the array length, so two messages sharing a key are always handled by the same
/// task, in delivery order. The channel's bounded capacity (1) provides the same
/// "blocks until the target worker is ready" backpressure the original unbuffered channel gave.
pub struct KeyPartitionWorker {
    topic: String,
    num_workers: usize,
    channels: Mutex<Vec<mpsc::Sender<RoutedMessage>>>,
    hasher: RandomState,
    windows: Mutex<HashMap<i32, Arc<SlideWindow>>>,
}

impl KeyPartitionWorker {
    pub fn new(topic: impl Into<String>, max_concurrency: usize, handler: Arc<dyn TopicHandler>) -> Self {
        let topic = topic.into();
        let max_concurrency = max_concurrency.max(1);
        let mut channels = Vec::with_capacity(max_concurrency);

        for worker_id in 0..max_concurrency {
            let (tx, rx) = mpsc::channel(1);
            channels.push(tx);
            tokio::spawn(run_worker(topic.clone(), worker_id, handler.clone(), rx));
        }

        Self {
            topic,
            num_workers: max_concurrency,
            channels: Mutex::new(channels),
            hasher: RandomState::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn route(&self, key: &[u8]) -> usize {
        let mut hasher = self.hasher.build_hasher();
        hasher.write(key);
        (hasher.finish() % self.num_workers as u64) as usize
    }
}

async fn run_worker(
    topic: String,
    worker_id: usize,
    handler: Arc<dyn TopicHandler>,
    mut rx: mpsc::Receiver<RoutedMessage>,
) {
    while let Some(RoutedMessage { message, window }) = rx.recv().await {
        let partition = message.partition;
        let offset = message.offset;
        let key = message.key.clone();
        let handler = handler.clone();

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
                    worker_id,
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
    }
}

#[async_trait]
impl TopicWorker for KeyPartitionWorker {
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

        let route = self.route(message.key.as_deref().unwrap_or_default());
        let sender = self.channels.lock().unwrap().get(route).cloned();
        let Some(sender) = sender else {
            error!(
                topic = %self.topic,
                route,
                "key-partition worker channel closed, offset left unmarked for redelivery"
            );
            return;
        };

        if sender.send(RoutedMessage { message, window }).await.is_err() {
            error!(
                topic = %self.topic,
                route,
                "key-partition worker channel closed, offset left unmarked for redelivery"
            );
        }
    }

    fn release(&self) {
        // Dropping every sender half closes each worker's channel, letting in-flight work
        // drain and the worker task exit its `recv` loop.
        self.channels.lock().unwrap().clear();

        let mut windows = self.windows.lock().unwrap();
        for window in windows.values() {
            window.close();
        }
        windows.clear();
    }
}
