use std::sync::Arc;

use dashmap::DashMap;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::TopicPartitionList;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::BatchConfig;
use crate::consumption_loop::BatchConsumptionLoop;
use crate::decoder::Decoder;
use crate::error::ConsumerError;
use crate::kafka::committer::KafkaOffsetCommitter;
use crate::kafka::context::{AssignmentTokens, BatchConsumerContext, RebalanceEvent};
use crate::kafka::errors::KafkaErrorBackoff;
use crate::kafka::source::KafkaPartitionSource;
use crate::kafka::workers::WorkerSet;
use crate::metrics_consts::BATCH_CONSUMER_ASSIGNED_PARTITIONS;
use crate::processor::BatchProcessor;
use crate::types::Partition;

/// Consumer-group member that runs one `BatchConsumptionLoop` per assigned partition.
///
/// Each assigned partition gets its own rdkafka queue and its own task, so
/// batches of a partition are processed and committed strictly in order while
/// partitions progress independently. A worker failing on a partition we still
/// own stops the whole consumer with that error; the caller is expected to
/// restart it, which hands the uncommitted messages out again.
pub struct KafkaBatchConsumer<D: Decoder> {
    consumer: Arc<StreamConsumer<BatchConsumerContext>>,
    topic: String,

    batch_config: BatchConfig,
    decoder: Arc<D>,
    processor: Arc<dyn BatchProcessor<D::Output>>,

    // partition -> token, shared with the rebalance callbacks
    assignments: AssignmentTokens,
    workers: WorkerSet,
    rebalance_rx: mpsc::UnboundedReceiver<RebalanceEvent>,

    // shutdown signal from the parent process, and the token all
    // workers derive theirs from
    shutdown: CancellationToken,
    workers_token: CancellationToken,
}

impl<D> KafkaBatchConsumer<D>
where
    D: Decoder + 'static,
{
    pub fn new(
        config: &ClientConfig,
        topic: &str,
        batch_config: BatchConfig,
        decoder: D,
        processor: Arc<dyn BatchProcessor<D::Output>>,
        shutdown: CancellationToken,
    ) -> Result<Self, ConsumerError> {
        let assignments: AssignmentTokens = Arc::new(DashMap::new());
        let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();

        let context = BatchConsumerContext::new(assignments.clone(), rebalance_tx);
        let consumer: StreamConsumer<BatchConsumerContext> =
            config.create_with_context(context)?;
        consumer.subscribe(&[topic])?;

        let workers_token = shutdown.child_token();

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: topic.to_string(),
            batch_config,
            decoder: Arc::new(decoder),
            processor,
            workers: WorkerSet::new(assignments.clone()),
            assignments,
            rebalance_rx,
            shutdown,
            workers_token,
        })
    }

    // NOT FOR PROD - handy for integration smoke tests
    pub fn inner_consumer(&self) -> Arc<StreamConsumer<BatchConsumerContext>> {
        self.consumer.clone()
    }

    /// Consume until the shutdown token is cancelled or a partition worker fails.
    ///
    /// On the way out every worker is cancelled and awaited, so each gets to
    /// flush and commit its pending batch. Returns the first error seen.
    pub async fn run(mut self) -> Result<(), ConsumerError> {
        info!(topic = self.topic, "Starting batch Kafka message consumption...");

        let consumer = self.consumer.clone();
        let mut kafka_errors = KafkaErrorBackoff::for_topic(&self.topic);
        let mut outcome = Ok(());

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received, starting graceful shutdown");
                    break;
                }

                Some(event) = self.rebalance_rx.recv() => {
                    if let Err(e) = self.handle_rebalance(event).await {
                        outcome = Err(e);
                        break;
                    }
                }

                Some(exit) = self.workers.join_next() => {
                    self.record_assigned_partitions();
                    if let Err(e) = exit {
                        outcome = Err(e);
                        break;
                    }
                }

                // Polling the main queue serves rebalance callbacks. Assigned
                // partitions are routed to their own queues, so nothing
                // should ever arrive here.
                next = async {
                    consumer
                        .recv()
                        .await
                        .map(|msg| Partition::new(msg.topic(), msg.partition()))
                } => {
                    match next {
                        Ok(partition) => {
                            error!(
                                topic = partition.topic(),
                                partition = partition.partition_number(),
                                "Message delivered outside of a partition queue"
                            );
                            outcome = Err(ConsumerError::UnroutedMessage(partition));
                            break;
                        }
                        Err(e) => {
                            if let Err(fatal) = kafka_errors.handle(e).await {
                                outcome = Err(fatal.into());
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.workers_token.cancel();
        if let Err(e) = self.workers.shutdown().await {
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }
        metrics::gauge!(BATCH_CONSUMER_ASSIGNED_PARTITIONS).set(0.0);

        info!("Batch consumer loop shut down");
        outcome
    }

    async fn handle_rebalance(&mut self, event: RebalanceEvent) -> Result<(), ConsumerError> {
        match event {
            RebalanceEvent::Assign(partitions) => {
                let mut resume = TopicPartitionList::new();
                for partition in partitions {
                    // a worker left over from an earlier assignment of this
                    // partition must release its queue first
                    self.workers.replace(&partition).await?;

                    self.start_worker(partition.clone())?;
                    resume.add_partition(partition.topic(), partition.partition_number());
                }

                self.consumer.resume(&resume)?;
            }
            RebalanceEvent::Revoke(partitions) => {
                // the rebalance callback already cancelled these; this only
                // covers workers started after the callback ran
                for partition in &partitions {
                    if let Some((_, token)) = self.assignments.remove(partition) {
                        token.cancel();
                    }
                }
            }
        }

        self.record_assigned_partitions();
        Ok(())
    }

    fn start_worker(&mut self, partition: Partition) -> Result<(), ConsumerError> {
        let queue = self
            .consumer
            .split_partition_queue(partition.topic(), partition.partition_number())
            .ok_or_else(|| ConsumerError::PartitionQueue(partition.clone()))?;

        let token = self.workers_token.child_token();
        let worker = BatchConsumptionLoop::new(
            self.batch_config,
            self.decoder.clone(),
            self.processor.clone(),
            Arc::new(KafkaOffsetCommitter::new(self.consumer.clone())),
            token.clone(),
        );
        let source = KafkaPartitionSource::new(&partition, queue);

        self.workers.spawn(partition, token, worker.run(source));
        Ok(())
    }

    fn record_assigned_partitions(&self) {
        metrics::gauge!(BATCH_CONSUMER_ASSIGNED_PARTITIONS).set(self.assignments.len() as f64);
    }
}
