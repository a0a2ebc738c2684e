use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::error;

use crate::handler::TopicHandler;
use crate::message::KafkaMessage;
use crate::slide_window::SlideWindow;

use super::TopicWorker;

/// Used when `window_size == 1` or `max_concurrency == 1`. Runs the handler on the calling task
/// (the shared dispatch loop) and marks the offset immediately afterwards. A handler error is
/// logged but never stalls the window — the offset is marked regardless.
pub struct SingleWorker {
    topic: String,
    handler: Arc<dyn TopicHandler>,
    windows: Mutex<HashMap<i32, Arc<SlideWindow>>>,
}

impl SingleWorker {
    pub fn new(topic: impl Into<String>, handler: Arc<dyn TopicHandler>) -> Self {
        Self {
            topic: topic.into(),
            handler,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TopicWorker for SingleWorker {
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

        let result = self.handler.handle(&message).await;
        if let Err(err) = &result {
            error!(
                topic = %self.topic,
                partition = message.partition,
                offset = message.offset,
                key = ?message.key,
                error = %err,
                "handler returned an error"
            );
        }
        window.mark_offset(message.offset, result.is_ok());
    }

    fn release(&self) {
        let mut windows = self.windows.lock().unwrap();
        for window in windows.values() {
            window.close();
        }
        windows.clear();
    }
}
