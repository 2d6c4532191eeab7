// ==== Batch accumulation metrics ====
/// Counter for flushed batches, labelled by what completed them (size, deadline, closed, cancelled, error)
pub const BATCH_CONSUMER_BATCHES_FLUSHED: &str = "batch_consumer_batches_flushed_total";

/// Histogram for number of decoded messages per flushed batch
pub const BATCH_CONSUMER_BATCH_SIZE: &str = "batch_consumer_batch_size";

/// Histogram for how full batches are relative to the configured size
pub const BATCH_CONSUMER_BATCH_FILL_RATIO: &str = "batch_consumer_batch_fill_ratio";

/// Counter for accumulation windows that expired without any message
pub const BATCH_CONSUMER_EMPTY_WINDOWS: &str = "batch_consumer_empty_windows_total";

/// Counter for messages dropped because their payload failed to decode
pub const BATCH_CONSUMER_DECODE_FAILURES: &str = "batch_consumer_decode_failures_total";

// ==== Processing and commit metrics ====
/// Histogram for processor execution time
pub const BATCH_CONSUMER_PROCESSING_DURATION_MS: &str = "batch_consumer_processing_duration_ms";

/// Counter for batches the processor rejected
pub const BATCH_CONSUMER_PROCESSING_FAILURES: &str = "batch_consumer_processing_failures_total";

/// Counter for offsets committed after successful batches
pub const BATCH_CONSUMER_OFFSETS_COMMITTED: &str = "batch_consumer_offsets_committed_total";

/// Counter for commits that failed or were refused
pub const BATCH_CONSUMER_COMMIT_FAILURES: &str = "batch_consumer_commit_failures_total";

// ==== Kafka metrics ====
/// Counter for errors reported by librdkafka, labelled by level and error kind
pub const BATCH_CONSUMER_KAFKA_ERROR: &str = "batch_consumer_kafka_error_total";

/// Gauge for partitions currently owned by this consumer
pub const BATCH_CONSUMER_ASSIGNED_PARTITIONS: &str = "batch_consumer_assigned_partitions";

/// Counter for rebalance callbacks that carried no partitions
pub const REBALANCE_EMPTY_SKIPPED: &str = "batch_consumer_rebalance_empty_skipped_total";
