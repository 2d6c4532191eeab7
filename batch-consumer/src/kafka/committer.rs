use std::sync::Arc;

use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::{Offset, TopicPartitionList};

use crate::commit::{CommitMarker, OffsetCommitter};
use crate::error::CommitError;

/// Commits batch positions to the consumer group.
///
/// Kafka stores the next offset to read, so a marker for offset N commits N + 1.
/// Commits are synchronous so a batch only counts as acknowledged once the
/// broker accepted it.
pub struct KafkaOffsetCommitter<C: ConsumerContext + 'static> {
    consumer: Arc<StreamConsumer<C>>,
}

impl<C: ConsumerContext + 'static> KafkaOffsetCommitter<C> {
    pub fn new(consumer: Arc<StreamConsumer<C>>) -> Self {
        Self { consumer }
    }
}

impl<C: ConsumerContext + 'static> OffsetCommitter for KafkaOffsetCommitter<C> {
    fn commit(&self, marker: &CommitMarker) -> Result<(), CommitError> {
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(
            marker.partition().topic(),
            marker.partition().partition_number(),
            Offset::Offset(marker.next_offset()),
        )?;

        self.consumer.commit(&list, CommitMode::Sync)?;
        Ok(())
    }
}
