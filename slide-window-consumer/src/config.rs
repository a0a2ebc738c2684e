use std::sync::Arc;

use envconfig::Envconfig;

use crate::handler::TopicHandler;

/// Ambient, environment-driven configuration for the underlying Kafka client.
///
/// Mirrors the shape of the teacher's `common_kafka::config::KafkaConfig`: broker list, TLS, and
/// the handful of producer/consumer-adjacent knobs a deployment actually needs to flip.
#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(from = "KAFKA_HOSTS", default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(from = "KAFKA_TLS", default = "false")]
    pub kafka_tls: bool,

    #[envconfig(from = "KAFKA_CONSUMER_OFFSET_RESET", default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    /// Interval, in milliseconds, at which librdkafka flushes the locally-stored offsets
    /// (maintained by our own [`crate::offset_committer::OffsetCommitter`]) to the broker.
    #[envconfig(from = "KAFKA_AUTO_COMMIT_INTERVAL_MS", default = "1000")]
    pub kafka_auto_commit_interval_ms: u32,
}

/// Concurrency routing strategy requested for a topic, see §3 TopicRegistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyModel {
    /// Any worker in a shared pool may handle any message for the topic.
    Pool,
    /// Messages with the same key are always routed to the same worker, in delivery order.
    KeySerialized,
}

/// Per-topic registration, created once at [`crate::Framework::register_topic`] and immutable
/// thereafter.
#[derive(Clone)]
pub struct TopicRegistration {
    pub topic: String,
    pub max_concurrency: usize,
    pub window_size: usize,
    pub concurrency_model: ConcurrencyModel,
    pub handler: Arc<dyn TopicHandler>,
}

impl TopicRegistration {
    pub fn new(
        topic: impl Into<String>,
        max_concurrency: usize,
        window_size: usize,
        concurrency_model: ConcurrencyModel,
        handler: Arc<dyn TopicHandler>,
    ) -> Self {
        let window_size = window_size.max(1);
        let max_concurrency = max_concurrency.max(1).min(window_size);

        Self {
            topic: topic.into(),
            max_concurrency,
            window_size,
            concurrency_model,
            handler,
        }
    }

    /// `windowSize == 1` or `maxConcurrency == 1` always collapses to the `Single` variant,
    /// regardless of the requested concurrency model — a worker count larger than the window
    /// can never be kept busy.
    pub fn is_single(&self) -> bool {
        self.max_concurrency == 1 || self.window_size == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rstest::rstest;

    struct NoopHandler;

    #[async_trait]
    impl TopicHandler for NoopHandler {
        async fn handle(&self, _message: &crate::message::KafkaMessage) -> Result<(), crate::error::HandlerError> {
            Ok(())
        }
    }

    #[rstest]
    #[case(8, 3, 3, 3)] // concurrency above window size is clamped down to it
    #[case(0, 0, 1, 1)] // zero values are clamped up to one
    #[case(4, 10, 4, 10)] // already-valid values pass through unchanged
    fn clamps_max_concurrency(
        #[case] requested_concurrency: usize,
        #[case] requested_window: usize,
        #[case] expected_concurrency: usize,
        #[case] expected_window: usize,
    ) {
        let reg = TopicRegistration::new(
            "orders",
            requested_concurrency,
            requested_window,
            ConcurrencyModel::Pool,
            Arc::new(NoopHandler),
        );
        assert_eq!(reg.max_concurrency, expected_concurrency);
        assert_eq!(reg.window_size, expected_window);
    }

    #[rstest]
    #[case(1, 10, true)] // max_concurrency == 1 forces Single regardless of window size
    #[case(4, 1, true)] // window_size == 1 forces Single regardless of concurrency
    #[case(4, 10, false)]
    fn single_variant_selection(#[case] max_concurrency: usize, #[case] window_size: usize, #[case] expected_single: bool) {
        let reg = TopicRegistration::new(
            "orders",
            max_concurrency,
            window_size,
            ConcurrencyModel::Pool,
            Arc::new(NoopHandler),
        );
        assert_eq!(reg.is_single(), expected_single);
    }
}
