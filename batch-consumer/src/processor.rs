use anyhow::Result;
use async_trait::async_trait;

use crate::batch::Batch;

/// Business logic run once per completed batch. Returning an error leaves the
/// partition's committed offset where it was and stops the consumption loop,
/// so the batch is delivered again after the assignment is retried.
#[async_trait]
pub trait BatchProcessor<T>: Send + Sync {
    async fn process_batch(&self, batch: Batch<T>) -> Result<()>;
}
