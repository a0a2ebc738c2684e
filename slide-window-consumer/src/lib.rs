//! A concurrent Kafka consumer framework built on `rdkafka`, with per-partition sliding-window
//! offset tracking: commits always advance through a contiguous prefix of processed offsets,
//! even when handlers complete out of order, and producers are throttled once too much work for
//! a partition is in flight.
//!
//! Three concurrency strategies are available per topic (see [`config::ConcurrencyModel`]):
//! a single synchronous worker, a shared bounded pool, or per-key serialized routing.

pub mod config;
pub mod error;
pub mod handler;
pub mod message;

mod offset_committer;
mod orchestrator;
mod slide_window;
mod worker;

mod framework;

pub use config::{ConcurrencyModel, KafkaConfig, TopicRegistration};
pub use error::{FrameworkError, HandlerError};
pub use framework::Framework;
pub use handler::TopicHandler;
pub use message::KafkaMessage;
