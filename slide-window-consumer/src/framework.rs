use std::collections::HashMap;
use std::sync::Mutex;

use health::HealthHandle;
use rdkafka::config::ClientConfig;
use tokio::sync::watch;
use tracing::info;

use crate::config::{KafkaConfig, TopicRegistration};
use crate::error::FrameworkError;
use crate::orchestrator::Orchestrator;

/// Races the caller-supplied `shutdown` against SIGINT and SIGTERM and forwards whichever fires
/// first onto the `watch::channel` the [`Orchestrator`] actually consumes.
async fn wait_for_shutdown(mut external: watch::Receiver<bool>) {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = external.changed() => info!("received external shutdown signal"),
    }
}

/// Public entry point: register one or more topics, then hand the framework a shutdown signal
/// and let it drive the consumer group for the lifetime of the process.
///
/// Mirrors the shape of the teacher's `SingleTopicConsumer`, generalized from "one consumer, one
/// topic" to "one consumer group, many topics, each with its own concurrency strategy".
pub struct Framework {
    client_config: ClientConfig,
    health: Option<HealthHandle>,
    registrations: Mutex<HashMap<String, TopicRegistration>>,
    running: Mutex<bool>,
}

impl Framework {
    pub fn new(kafka_config: &KafkaConfig, group_id: impl Into<String>, health: Option<HealthHandle>) -> Self {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &kafka_config.kafka_hosts)
            .set("group.id", group_id.into())
            .set("statistics.interval.ms", "10000")
            .set("auto.offset.reset", &kafka_config.kafka_consumer_offset_reset)
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                kafka_config.kafka_auto_commit_interval_ms.to_string(),
            );

        if kafka_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        Self {
            client_config,
            health,
            registrations: Mutex::new(HashMap::new()),
            running: Mutex::new(false),
        }
    }

    /// Registers a topic's handler and concurrency strategy. Must be called before [`Self::run`];
    /// registering the same topic twice, or registering after `run` has started, is an error.
    pub fn register_topic(&self, registration: TopicRegistration) -> Result<(), FrameworkError> {
        if *self.running.lock().unwrap() {
            return Err(FrameworkError::RegisteredAfterRun(registration.topic));
        }

        let mut registrations = self.registrations.lock().unwrap();
        if registrations.contains_key(&registration.topic) {
            return Err(FrameworkError::DuplicateRegistration(registration.topic));
        }
        registrations.insert(registration.topic.clone(), registration);
        Ok(())
    }

    /// Builds the consumer group and runs its per-partition readers until SIGINT, SIGTERM, or
    /// the caller's own `shutdown` fires, whichever comes first. Returns once every in-flight
    /// message has been handled and all workers released.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), FrameworkError> {
        let registrations = self.registrations.lock().unwrap().clone();
        if registrations.is_empty() {
            return Err(FrameworkError::NoTopicsRegistered);
        }
        *self.running.lock().unwrap() = true;

        let orchestrator = Orchestrator::new(self.client_config.clone(), registrations, self.health.clone())?;

        let (internal_tx, internal_rx) = watch::channel(false);
        tokio::spawn(async move {
            wait_for_shutdown(shutdown).await;
            let _ = internal_tx.send(true);
        });

        orchestrator.run(internal_rx).await;
        Ok(())
    }
}
