use thiserror::Error;

/// Errors returned synchronously from the public API, before or during `Framework::run`.
///
/// Per-message failures never reach this type — they are logged and handled entirely inside
/// the worker that owns the message (see [`crate::error::HandlerError`]).
#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("kafka client error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("topic '{0}' was registered after the framework was already running")]
    RegisteredAfterRun(String),

    #[error("topic '{0}' was registered twice")]
    DuplicateRegistration(String),

    #[error("no topics registered before calling run()")]
    NoTopicsRegistered,
}

/// Error returned by a user-supplied [`crate::handler::TopicHandler`].
///
/// The framework's contract is at-least-once delivery with best-effort handling: a handler
/// error is logged with full message context and the offset is still marked as processed. A
/// handler that needs retry or dead-lettering must implement that itself.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
