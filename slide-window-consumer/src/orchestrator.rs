use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use health::HealthHandle;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::stream_consumer::StreamPartitionQueue;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::{ClientContext, TopicPartitionList};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{ConcurrencyModel, TopicRegistration};
use crate::error::FrameworkError;
use crate::message::KafkaMessage;
use crate::offset_committer::OffsetSink;
use crate::slide_window::SlideWindow;
use crate::worker::{KeyPartitionWorker, PoolWorker, SingleWorker, TopicWorker};

type PartitionKey = (String, i32);

/// Bridges a [`SlideWindow`]'s committer back to the owning consumer's `store_offset`. Holds a
/// weak handle so the window never keeps the consumer alive past shutdown — mirrors the
/// `Weak<Inner>` handle the teacher's `kafka_consumer::Offset` uses for the same purpose.
struct ConsumerOffsetSink {
    consumer: Weak<StreamConsumer<OrchestratorContext>>,
}

impl OffsetSink for ConsumerOffsetSink {
    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<(), String> {
        let consumer = self
            .consumer
            .upgrade()
            .ok_or_else(|| "consumer dropped".to_string())?;
        consumer
            .store_offset(topic, partition, offset)
            .map_err(|err| err.to_string())
    }
}

/// Shared state behind the rebalance callbacks and every partition reader task.
///
/// `registrations` is fixed at construction (topics can only be registered before `run()`).
/// `workers` and `windows` are built up lazily: a topic's worker is created the first time any
/// of its partitions is read from, and a partition's window is created the first time a message
/// for it is observed — there is no earlier, reliable "initial offset" signal available from a
/// rebalance `Assign` event itself, so we use the first message's offset as the window's
/// baseline, same as the original's `claim.InitialOffset()` of an inbound partition claim.
///
/// `partition_tasks` holds one entry per currently-assigned partition: the dedicated reader task
/// draining that partition's own [`StreamPartitionQueue`]. Splitting queues this way, rather than
/// dispatching every partition off one shared `consumer.recv()` loop, is what keeps a backed-up
/// partition's `SlideWindow::wait` or `KeyPartitionWorker` channel `send` from suspending any
/// other partition's, or any other topic's, delivery.
pub(crate) struct OrchestratorState {
    registrations: HashMap<String, TopicRegistration>,
    workers: Mutex<HashMap<String, Arc<dyn TopicWorker>>>,
    windows: Mutex<HashMap<PartitionKey, Arc<SlideWindow>>>,
    partition_tasks: Mutex<HashMap<PartitionKey, tokio::task::JoinHandle<()>>>,
    consumer: OnceLock<Weak<StreamConsumer<OrchestratorContext>>>,
    health: Option<HealthHandle>,
}

impl OrchestratorState {
    fn worker_for(&self, topic: &str) -> Option<Arc<dyn TopicWorker>> {
        if let Some(worker) = self.workers.lock().unwrap().get(topic).cloned() {
            return Some(worker);
        }

        let registration = self.registrations.get(topic)?;
        let worker: Arc<dyn TopicWorker> = if registration.is_single() {
            Arc::new(SingleWorker::new(topic, registration.handler.clone()))
        } else {
            match registration.concurrency_model {
                ConcurrencyModel::Pool => Arc::new(PoolWorker::new(
                    topic,
                    registration.max_concurrency,
                    registration.handler.clone(),
                )),
                ConcurrencyModel::KeySerialized => Arc::new(KeyPartitionWorker::new(
                    topic,
                    registration.max_concurrency,
                    registration.handler.clone(),
                )),
            }
        };

        self.workers
            .lock()
            .unwrap()
            .insert(topic.to_string(), worker.clone());
        Some(worker)
    }

    fn window_for(
        &self,
        worker: &Arc<dyn TopicWorker>,
        topic: &str,
        partition: i32,
        first_offset: i64,
    ) -> Arc<SlideWindow> {
        let key = (topic.to_string(), partition);
        if let Some(window) = self.windows.lock().unwrap().get(&key).cloned() {
            return window;
        }

        // Only reachable via worker_for, which already checked the topic is registered.
        let registration = self
            .registrations
            .get(topic)
            .expect("window requested for an unregistered topic");
        let sink = Box::new(ConsumerOffsetSink {
            consumer: self.consumer.get().cloned().unwrap_or_else(Weak::new),
        });
        let window = SlideWindow::new(topic, partition, registration.window_size, first_offset, sink);
        worker.attach_window(partition, window.clone());
        self.windows.lock().unwrap().insert(key, window.clone());
        window
    }

    /// Spawns one reader task per partition in `tpl` that doesn't already have one. Each task
    /// owns its own [`StreamPartitionQueue`], so a partition whose window fills up only ever
    /// suspends its own task.
    fn assign_partitions(
        self: &Arc<Self>,
        consumer: &Arc<StreamConsumer<OrchestratorContext>>,
        tpl: &TopicPartitionList,
    ) {
        for elem in tpl.elements() {
            let topic = elem.topic().to_string();
            let partition = elem.partition();
            let key = (topic.clone(), partition);

            if self.partition_tasks.lock().unwrap().contains_key(&key) {
                continue;
            }

            let queue = match consumer.split_partition_queue(&topic, partition) {
                Some(queue) => queue,
                None => {
                    error!(topic = %topic, partition, "failed to split off a partition queue, this partition will not be read");
                    continue;
                }
            };

            let state = self.clone();
            let handle = tokio::spawn(run_partition(state, topic.clone(), partition, queue));
            self.partition_tasks.lock().unwrap().insert(key, handle);
        }
    }

    /// Tears down every partition named in `tpl`: aborts its reader task and closes (and drops)
    /// its window. Called synchronously from `pre_rebalance` on revoke, so a subsequent
    /// re-assignment of the same partition always starts from a clean slate — any messages
    /// between the last committed watermark and the point of revocation are simply redelivered
    /// by the broker on the next assignment, never resumed from stale in-memory state.
    fn revoke_partitions(&self, tpl: &TopicPartitionList) {
        for elem in tpl.elements() {
            let key = (elem.topic().to_string(), elem.partition());
            if let Some(task) = self.partition_tasks.lock().unwrap().remove(&key) {
                task.abort();
            }
            if let Some(window) = self.windows.lock().unwrap().remove(&key) {
                window.close();
            }
        }
    }

    /// Releases every worker and aborts every remaining partition reader task. Called once, on
    /// final shutdown, after the orchestrator's event-pump loop exits.
    fn cleanup(&self) {
        let tasks: Vec<_> = self
            .partition_tasks
            .lock()
            .unwrap()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for task in tasks {
            task.abort();
        }

        let workers: Vec<_> = self.workers.lock().unwrap().drain().map(|(_, w)| w).collect();
        for worker in &workers {
            worker.release();
        }
        self.windows.lock().unwrap().clear();
    }
}

/// Drains one partition's [`StreamPartitionQueue`] for as long as the partition stays assigned.
/// Aborted from [`OrchestratorState::revoke_partitions`] when the partition is revoked.
async fn run_partition(
    state: Arc<OrchestratorState>,
    topic: String,
    partition: i32,
    queue: StreamPartitionQueue<OrchestratorContext>,
) {
    loop {
        match queue.recv().await {
            Ok(borrowed) => {
                let message = KafkaMessage::from_borrowed(&borrowed);
                let Some(worker) = state.worker_for(&message.topic) else {
                    warn!(topic = %message.topic, "message for unregistered topic, dropping");
                    continue;
                };

                state.window_for(&worker, &message.topic, message.partition, message.offset);
                metrics::counter!("slide_window_messages_dispatched_total", "topic" => topic.clone())
                    .increment(1);
                worker.process_message(message).await;
            }
            Err(err) => {
                error!(topic = %topic, partition, error = %err, "error receiving from partition queue");
            }
        }
    }
}

/// Notified of group rebalances. Assign spawns the new partitions' reader tasks; Revoke tears
/// down the revoked ones — neither ever touches a partition it wasn't told about.
pub(crate) struct OrchestratorContext {
    state: Arc<OrchestratorState>,
}

impl ClientContext for OrchestratorContext {}

impl ConsumerContext for OrchestratorContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            info!(partitions = tpl.count(), "partitions revoked, tearing down their readers and windows");
            self.state.revoke_partitions(tpl);
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                info!(partitions = tpl.count(), "partitions assigned");
                if let Some(consumer) = self.state.consumer.get().and_then(Weak::upgrade) {
                    self.state.assign_partitions(&consumer, tpl);
                }
            }
            Rebalance::Error(err) => error!(error = %err, "rebalance error"),
            Rebalance::Revoke(_) => {}
        }
        if let Some(health) = &self.state.health {
            health.report_healthy_blocking();
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        if let Err(err) = result {
            warn!(error = %err, partitions = offsets.count(), "commit failed");
        }
    }
}

/// Owns the consumer handle and the event pump that keeps rebalances flowing once every
/// assigned partition has been split off into its own queue. Built once per
/// [`crate::Framework::run`] call from the topic registrations accumulated up to that point.
pub(crate) struct Orchestrator {
    consumer: Arc<StreamConsumer<OrchestratorContext>>,
    state: Arc<OrchestratorState>,
}

impl Orchestrator {
    pub(crate) fn new(
        client_config: ClientConfig,
        registrations: HashMap<String, TopicRegistration>,
        health: Option<HealthHandle>,
    ) -> Result<Self, FrameworkError> {
        let state = Arc::new(OrchestratorState {
            registrations,
            workers: Mutex::new(HashMap::new()),
            windows: Mutex::new(HashMap::new()),
            partition_tasks: Mutex::new(HashMap::new()),
            consumer: OnceLock::new(),
            health,
        });

        let context = OrchestratorContext {
            state: state.clone(),
        };
        let consumer: StreamConsumer<OrchestratorContext> =
            client_config.create_with_context(context)?;
        let consumer = Arc::new(consumer);
        let _ = state.consumer.set(Arc::downgrade(&consumer));

        let topics: Vec<&str> = state.registrations.keys().map(String::as_str).collect();
        consumer.subscribe(&topics)?;

        Ok(Self { consumer, state })
    }

    /// Pumps the main consumer handle until `shutdown` fires, then releases all worker, window
    /// and partition-task state before returning.
    ///
    /// Once a partition is assigned it is read entirely through its own [`StreamPartitionQueue`]
    /// by a dedicated [`run_partition`] task. This loop's own `recv()` call exists only because
    /// librdkafka requires the main consumer to be polled for rebalance callbacks and statistics
    /// to fire at all, even after every partition has been split off — the same pump the
    /// `examples/other_examples/65332788_dustin10-kaftui__src-kafka.rs.rs` reference notes as
    /// required by the crate's own docs. Any message actually delivered here (which should not
    /// happen once its partition is split) is logged and dropped rather than processed, to avoid
    /// dispatching it twice.
    pub(crate) async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!("shutdown signal received, draining partition readers");
                    break;
                }

                message = self.consumer.recv() => {
                    match message {
                        Ok(borrowed) => {
                            warn!(
                                topic = %borrowed.topic(),
                                partition = borrowed.partition(),
                                "message arrived on the un-split main consumer queue, dropping"
                            );
                        }
                        Err(err) => error!(error = %err, "error polling kafka client for events"),
                    }
                }
            }
        }
        self.state.cleanup();
    }
}
