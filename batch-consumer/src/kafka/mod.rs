// Kafka module - consumer-group integration for the batching core
pub mod committer;
pub mod config;
pub mod consumer;
pub mod context;
pub mod errors;
pub mod source;
pub mod workers;

// Public API
pub use config::ConsumerConfigBuilder;
pub use consumer::KafkaBatchConsumer;
