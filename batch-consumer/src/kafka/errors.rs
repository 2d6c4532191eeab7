use std::time::Duration;

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use tokio::time::sleep;
use tracing::{error, warn};

use crate::metrics_consts::BATCH_CONSUMER_KAFKA_ERROR;
use crate::types::Partition;

/// How a consumer error should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KafkaErrorKind {
    /// Keep polling after `backoff`
    Transient {
        error: &'static str,
        backoff: Duration,
    },
    /// Stop consuming and report the error
    Fatal { error: &'static str },
}

/// Classify `e`, the `consecutive_errors`-th error in a row on the same queue.
/// Backoffs grow with the streak and are capped per error kind.
pub fn classify_kafka_error(e: &KafkaError, consecutive_errors: u64) -> KafkaErrorKind {
    use KafkaErrorKind::{Fatal, Transient};

    let streak = consecutive_errors.max(1);
    match e {
        KafkaError::MessageConsumption(RDKafkaErrorCode::OperationTimedOut) => Transient {
            error: "op_timed_out",
            backoff: Duration::ZERO,
        },
        // the broker seeks to the auto.offset.reset position
        KafkaError::MessageConsumption(RDKafkaErrorCode::OffsetOutOfRange) => Transient {
            error: "offset_out_of_range",
            backoff: Duration::from_millis(500),
        },
        KafkaError::MessageConsumption(_) => Transient {
            error: "consumer",
            backoff: Duration::from_millis(100 * streak.min(10)),
        },
        KafkaError::MessageConsumptionFatal(_) => Fatal { error: "consumer" },
        KafkaError::Global(RDKafkaErrorCode::AllBrokersDown) => Transient {
            error: "all_brokers_down",
            backoff: Duration::from_secs(streak.min(5)),
        },
        KafkaError::Global(RDKafkaErrorCode::BrokerTransportFailure) => Transient {
            error: "broker_transport",
            backoff: Duration::from_secs(streak.min(3)),
        },
        KafkaError::Global(RDKafkaErrorCode::Authentication) => Fatal {
            error: "authentication",
        },
        KafkaError::Global(_) => Transient {
            error: "global",
            backoff: Duration::from_millis(500 * streak.min(6)),
        },
        KafkaError::Canceled => Fatal { error: "canceled" },
        _ => Transient {
            error: "unexpected",
            backoff: Duration::from_millis(100 * streak.min(10)),
        },
    }
}

/// Error streak of one rdkafka queue: a partition queue, or the main queue
/// of a subscription.
#[derive(Debug)]
pub struct KafkaErrorBackoff {
    topic: String,
    partition: Option<i32>,
    consecutive_errors: u64,
}

impl KafkaErrorBackoff {
    pub fn for_partition(partition: &Partition) -> Self {
        Self {
            topic: partition.topic().to_string(),
            partition: Some(partition.partition_number()),
            consecutive_errors: 0,
        }
    }

    pub fn for_topic(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            partition: None,
            consecutive_errors: 0,
        }
    }

    pub fn consecutive_errors(&self) -> u64 {
        self.consecutive_errors
    }

    /// A message came through, the streak is over
    pub fn reset(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Log and count `e`. Transient errors sleep out their backoff and return
    /// `Ok`; fatal ones are handed back.
    pub async fn handle(&mut self, e: KafkaError) -> Result<(), KafkaError> {
        self.consecutive_errors += 1;

        match classify_kafka_error(&e, self.consecutive_errors) {
            KafkaErrorKind::Transient { error, backoff } => {
                warn!(
                    topic = self.topic.as_str(),
                    partition = self.partition,
                    consecutive_errors = self.consecutive_errors,
                    backoff_ms = backoff.as_millis() as u64,
                    error_kind = error,
                    error = %e,
                    "Kafka consumer error - backing off"
                );
                metrics::counter!(BATCH_CONSUMER_KAFKA_ERROR, "level" => "warn", "error" => error)
                    .increment(1);
                sleep(backoff).await;
                Ok(())
            }
            KafkaErrorKind::Fatal { error } => {
                error!(
                    topic = self.topic.as_str(),
                    partition = self.partition,
                    error_kind = error,
                    error = %e,
                    "Fatal Kafka consumer error"
                );
                metrics::counter!(BATCH_CONSUMER_KAFKA_ERROR, "level" => "fatal", "error" => error)
                    .increment(1);
                Err(e)
            }
        }
    }
}
