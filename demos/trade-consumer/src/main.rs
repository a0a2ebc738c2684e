use std::future::ready;

use std::time::Duration;

use async_trait::async_trait;
use axum::{routing::get, Router};
use common_metrics::{serve, setup_metrics_routes};
use envconfig::Envconfig;
use rand::Rng;
use serde::Deserialize;
use slide_window_consumer::{
    ConcurrencyModel, Framework, HandlerError, KafkaMessage, TopicHandler, TopicRegistration,
};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod config;
use config::Config;

common_alloc::used!();

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse().unwrap()),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

/// A single buy/sell action. Handled per-key, so every action for one user's trading account is
/// applied in the order it was produced even though other users' actions run concurrently.
#[derive(Debug, Deserialize)]
struct UserAction {
    uid: i64,
    db_key: String,
    amount: i64,
    copy_action_id: i64,
    action: String,
}

struct TradeHandler;

#[async_trait]
impl TopicHandler for TradeHandler {
    async fn handle(&self, message: &KafkaMessage) -> Result<(), HandlerError> {
        // Settlement takes a variable amount of time depending on downstream load.
        let jitter_ms = rand::thread_rng().gen_range(0..3000);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

        let payload = message.value.as_deref().unwrap_or_default();
        let action: UserAction =
            serde_json::from_slice(payload).map_err(|err| HandlerError::new(err.to_string()))?;

        info!(
            uid = action.uid,
            db_key = %action.db_key,
            amount = action.amount,
            copy_action_id = action.copy_action_id,
            action = %action.action,
            "applied trade action"
        );
        Ok(())
    }
}

/// Chat messages don't need per-user ordering, just a bound on how many are processed at once.
struct ChatHandler;

#[async_trait]
impl TopicHandler for ChatHandler {
    async fn handle(&self, message: &KafkaMessage) -> Result<(), HandlerError> {
        match message.value.as_deref() {
            Some(payload) => info!(bytes = payload.len(), "delivered chat message"),
            None => warn!("dropped chat message with empty payload"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("starting trade-consumer");

    let config = Config::init_from_env()?;

    let bind = format!("{}:{}", config.bind_host, config.bind_port);
    let health_router = setup_metrics_routes(Router::new().route("/_liveness", get(|| ready("ok"))));
    tokio::task::spawn(async move {
        serve(health_router, &bind)
            .await
            .expect("failed to start health server");
    });

    // Framework::run installs its own SIGINT/SIGTERM handling; this channel is only for tests
    // or a supervisor that wants to trigger shutdown some other way, so it's never sent to here.
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let framework = Framework::new(&config.kafka, config.kafka_group_id, None);

    framework.register_topic(TopicRegistration::new(
        config.trade_topic,
        config.trade_max_concurrency,
        config.trade_window_size,
        ConcurrencyModel::KeySerialized,
        std::sync::Arc::new(TradeHandler),
    ))?;

    framework.register_topic(TopicRegistration::new(
        config.chat_topic,
        config.chat_max_concurrency,
        config.chat_window_size,
        ConcurrencyModel::Pool,
        std::sync::Arc::new(ChatHandler),
    ))?;

    framework.run(shutdown_rx).await?;

    info!("trade-consumer shut down");
    Ok(())
}
