use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::types::Partition;

/// Per-message payload decoding failures. These never stop consumption:
/// the offending message is dropped from the batch.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("message has no payload")]
    EmptyPayload,
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Errors raised by a message source while waiting for the next message.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("message source failed: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error(
        "refusing to move committed offset for {partition} from {committed} back to {attempted}"
    )]
    Regression {
        partition: Partition,
        committed: i64,
        attempted: i64,
    },
    #[error("offset commit failed: {0}")]
    Other(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("batch duration must be greater than zero")]
    ZeroBatchDuration,
}

/// Errors that terminate a consumption loop or the Kafka consumer driving it.
/// Callers should treat any of these as "retry this partition assignment".
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("batch processing failed for {partition} at offsets {first_offset}..={last_offset}: {source}")]
    Processing {
        partition: Partition,
        first_offset: i64,
        last_offset: i64,
        #[source]
        source: anyhow::Error,
    },
    #[error("offset commit failed: {0}")]
    Commit(#[from] CommitError),
    #[error("message source failed: {0}")]
    Source(#[from] SourceError),
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("could not split partition queue for {0}")]
    PartitionQueue(Partition),
    #[error("received message for {0} on the main consumer queue")]
    UnroutedMessage(Partition),
    #[error("partition worker did not complete: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
