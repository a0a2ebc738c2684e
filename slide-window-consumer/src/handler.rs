use async_trait::async_trait;

use crate::error::HandlerError;
use crate::message::KafkaMessage;

/// User code invoked once per message.
///
/// Must be safe to call concurrently: under [`crate::config::ConcurrencyModel::Pool`] any
/// worker task may call it, and under
/// [`crate::config::ConcurrencyModel::KeySerialized`] several distinct worker tasks call it
/// (each serialized only with respect to its own key).
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, message: &KafkaMessage) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> TopicHandler for F
where
    F: Fn(&KafkaMessage) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, message: &KafkaMessage) -> Result<(), HandlerError> {
        self(message).await
    }
}
