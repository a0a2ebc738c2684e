use envconfig::Envconfig;
use slide_window_consumer::KafkaConfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(from = "KAFKA_GROUP_ID", default = "trade-consumer-rust")]
    pub kafka_group_id: String,

    #[envconfig(from = "TRADE_TOPIC", default = "test_slide_window_partition")]
    pub trade_topic: String,

    #[envconfig(from = "TRADE_MAX_CONCURRENCY", default = "8")]
    pub trade_max_concurrency: usize,

    #[envconfig(from = "TRADE_WINDOW_SIZE", default = "10")]
    pub trade_window_size: usize,

    #[envconfig(from = "CHAT_TOPIC", default = "test_slide_window_partition_chat")]
    pub chat_topic: String,

    #[envconfig(from = "CHAT_MAX_CONCURRENCY", default = "3")]
    pub chat_max_concurrency: usize,

    #[envconfig(from = "CHAT_WINDOW_SIZE", default = "5")]
    pub chat_window_size: usize,

    #[envconfig(from = "BIND_HOST", default = "::")]
    pub bind_host: String,

    #[envconfig(from = "BIND_PORT", default = "3320")]
    pub bind_port: u16,
}
