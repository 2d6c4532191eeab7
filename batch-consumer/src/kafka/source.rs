use async_trait::async_trait;
use rdkafka::consumer::stream_consumer::StreamPartitionQueue;
use rdkafka::consumer::ConsumerContext;

use crate::error::SourceError;
use crate::kafka::errors::KafkaErrorBackoff;
use crate::message::RawMessage;
use crate::source::MessageSource;
use crate::types::Partition;

/// Messages of one assigned partition, read from its split-off rdkafka queue
pub struct KafkaPartitionSource<C: ConsumerContext + 'static> {
    queue: StreamPartitionQueue<C>,
    errors: KafkaErrorBackoff,
}

impl<C: ConsumerContext + 'static> KafkaPartitionSource<C> {
    pub fn new(partition: &Partition, queue: StreamPartitionQueue<C>) -> Self {
        Self {
            queue,
            errors: KafkaErrorBackoff::for_partition(partition),
        }
    }
}

#[async_trait]
impl<C: ConsumerContext + 'static> MessageSource for KafkaPartitionSource<C> {
    async fn next_message(&mut self) -> Option<Result<RawMessage, SourceError>> {
        loop {
            // copy the message out right away so nothing borrowed from the queue
            // is held across the backoff below
            let next = self
                .queue
                .recv()
                .await
                .map(|msg| RawMessage::from_borrowed_message(&msg));

            match next {
                Ok(message) => {
                    self.errors.reset();
                    return Some(Ok(message));
                }
                Err(e) => {
                    if let Err(fatal) = self.errors.handle(e).await {
                        return Some(Err(SourceError::Kafka(fatal)));
                    }
                }
            }
        }
    }
}
