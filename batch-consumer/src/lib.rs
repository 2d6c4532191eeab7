pub mod batch;
pub mod commit;
pub mod config;
pub mod consumption_loop;
pub mod decoder;
pub mod error;
pub mod kafka;
pub mod message;
pub mod metrics_consts;
pub mod processor;
pub mod source;
pub mod types;

// Used in "mod tests" and tests/ directory (integration tests)
pub mod test_utils;

// Public API
pub use batch::{Batch, BatchAccumulator};
pub use commit::{CommitCoordinator, CommitMarker, OffsetCommitter};
pub use config::BatchConfig;
pub use consumption_loop::BatchConsumptionLoop;
pub use decoder::{Decoder, FnDecoder, JsonDecoder};
pub use error::{CommitError, ConfigError, ConsumerError, DecodeError, SourceError};
pub use kafka::KafkaBatchConsumer;
pub use message::RawMessage;
pub use processor::BatchProcessor;
pub use source::MessageSource;
pub use types::Partition;
