use std::sync::Arc;

use dashmap::DashMap;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance};
use rdkafka::{ClientContext, TopicPartitionList};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics_consts::REBALANCE_EMPTY_SKIPPED;
use crate::types::Partition;

/// Cancellation tokens of the partition workers currently running, keyed by partition
pub type AssignmentTokens = Arc<DashMap<Partition, CancellationToken>>;

/// Rebalance events forwarded to the consumer's driver loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    /// Partitions were assigned and paused; workers must be started before resuming them
    Assign(Vec<Partition>),
    /// Partitions were revoked; their workers were already told to stop
    Revoke(Vec<Partition>),
}

pub struct BatchConsumerContext {
    assignments: AssignmentTokens,
    rebalance_tx: mpsc::UnboundedSender<RebalanceEvent>,
}

impl BatchConsumerContext {
    pub fn new(
        assignments: AssignmentTokens,
        rebalance_tx: mpsc::UnboundedSender<RebalanceEvent>,
    ) -> Self {
        Self {
            assignments,
            rebalance_tx,
        }
    }

    fn partitions(list: &TopicPartitionList) -> Vec<Partition> {
        list.elements().into_iter().map(Partition::from).collect()
    }

    /// Stop the workers of revoked partitions before the revocation completes,
    /// so none of them starts another cycle on a partition it no longer owns.
    fn cancel_workers(&self, partitions: &[Partition]) {
        for partition in partitions {
            if let Some((_, token)) = self.assignments.remove(partition) {
                token.cancel();
            }
        }
    }
}

impl ClientContext for BatchConsumerContext {}

impl ConsumerContext for BatchConsumerContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                // cooperative-sticky triggers rebalances that move nothing
                if partitions.count() == 0 {
                    debug!("Skipping empty revoke rebalance (cooperative-sticky no-op)");
                    metrics::counter!(REBALANCE_EMPTY_SKIPPED, "event_type" => "revoke")
                        .increment(1);
                    return;
                }

                info!("Revoking {} partitions", partitions.count());

                let partitions = Self::partitions(partitions);
                self.cancel_workers(&partitions);

                if let Err(e) = self.rebalance_tx.send(RebalanceEvent::Revoke(partitions)) {
                    error!("Failed to send revoke event to consumer loop: {}", e);
                }
            }
            Rebalance::Assign(partitions) => {
                info!(
                    "Pre-rebalance assign event for {} partitions",
                    partitions.count()
                );
            }
            Rebalance::Error(e) => {
                error!("Rebalance error: {}", e);
            }
        }
    }

    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                if partitions.count() == 0 {
                    debug!("Skipping empty assign rebalance (cooperative-sticky no-op)");
                    metrics::counter!(REBALANCE_EMPTY_SKIPPED, "event_type" => "assign")
                        .increment(1);
                    return;
                }

                // Pause until the consumer loop has split off a queue and
                // started a worker for each partition, otherwise messages
                // would land on the main queue instead.
                if let Err(e) = base_consumer.pause(partitions) {
                    error!(
                        "Failed to pause {} newly assigned partitions: {}",
                        partitions.count(),
                        e
                    );
                }

                info!("Assigned {} partitions", partitions.count());

                let partitions = Self::partitions(partitions);
                if let Err(e) = self.rebalance_tx.send(RebalanceEvent::Assign(partitions)) {
                    error!("Failed to send assign event to consumer loop: {}", e);
                }
            }
            Rebalance::Revoke(_) => {
                debug!("Post-rebalance revoke event");
            }
            Rebalance::Error(e) => {
                error!("Post-rebalance error: {}", e);
            }
        }
    }

    fn commit_callback(
        &self,
        result: rdkafka::error::KafkaResult<()>,
        offsets: &TopicPartitionList,
    ) {
        match result {
            Ok(_) => {
                debug!("Committed offsets for {} partitions", offsets.count());
            }
            Err(e) => {
                warn!("Failed to commit offsets: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rdkafka::Offset;

    use super::*;

    #[test]
    fn test_partitions_from_topic_partition_list() {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset("events", 0, Offset::Beginning)
            .unwrap();
        tpl.add_partition("events", 3);

        let partitions = BatchConsumerContext::partitions(&tpl);
        assert_eq!(
            partitions,
            vec![Partition::new("events", 0), Partition::new("events", 3)]
        );
        assert!(BatchConsumerContext::partitions(&TopicPartitionList::new()).is_empty());
    }

    #[test]
    fn test_cancel_workers_only_touches_revoked_partitions() {
        let assignments: AssignmentTokens = Arc::new(DashMap::new());
        let revoked = CancellationToken::new();
        let kept = CancellationToken::new();
        assignments.insert(Partition::new("events", 0), revoked.clone());
        assignments.insert(Partition::new("events", 1), kept.clone());

        let (tx, _rx) = mpsc::unbounded_channel();
        let context = BatchConsumerContext::new(assignments.clone(), tx);
        context.cancel_workers(&[Partition::new("events", 0), Partition::new("events", 7)]);

        assert!(revoked.is_cancelled());
        assert!(!kept.is_cancelled());
        assert!(!assignments.contains_key(&Partition::new("events", 0)));
        assert!(assignments.contains_key(&Partition::new("events", 1)));
    }
}
