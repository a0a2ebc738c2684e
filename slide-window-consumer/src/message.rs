use rdkafka::message::{BorrowedMessage, Headers, Message as _};

/// An owned, at-rest copy of a single Kafka record.
///
/// Built once per incoming [`BorrowedMessage`] so it can be moved across task boundaries (to a
/// pool worker or a key-partition worker) without holding the underlying librdkafka buffer
/// alive for the lifetime of the handler call.
#[derive(Debug, Clone)]
pub struct KafkaMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub timestamp_millis: Option<i64>,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl KafkaMessage {
    pub fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let headers = msg
            .headers()
            .map(|hdrs| {
                hdrs.iter()
                    .filter_map(|h| h.value.map(|v| (h.key.to_string(), v.to_vec())))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            value: msg.payload().map(|v| v.to_vec()),
            timestamp_millis: msg.timestamp().to_millis(),
            headers,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_message(topic: &str, partition: i32, offset: i64, key: &str) -> KafkaMessage {
    KafkaMessage {
        topic: topic.to_string(),
        partition,
        offset,
        key: Some(key.as_bytes().to_vec()),
        value: Some(b"{}".to_vec()),
        timestamp_millis: None,
        headers: Vec::new(),
    }
}
