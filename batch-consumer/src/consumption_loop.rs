//! Consumption loop - accumulates, processes and commits batches for one partition assignment
//!
//! Each cycle moves through `Idle -> Accumulating -> Flushing` and then either
//! starts over or terminates:
//! 1. A cycle ends when the batch is full, its deadline passes, the stream
//!    closes or fails, or the loop is cancelled
//! 2. A non-empty batch is handed to the processor exactly once; an empty one
//!    is never processed nor committed
//! 3. The offset is committed only after the processor succeeds, and only for
//!    the last message of the batch
//!
//! When the deadline and the next message become ready together the deadline
//! wins: the batch flushes by time and the message opens the next cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{Batch, BatchAccumulator};
use crate::commit::{CommitCoordinator, OffsetCommitter};
use crate::config::BatchConfig;
use crate::decoder::Decoder;
use crate::error::{ConsumerError, SourceError};
use crate::message::RawMessage;
use crate::metrics_consts::{
    BATCH_CONSUMER_BATCHES_FLUSHED, BATCH_CONSUMER_BATCH_FILL_RATIO, BATCH_CONSUMER_BATCH_SIZE,
    BATCH_CONSUMER_DECODE_FAILURES, BATCH_CONSUMER_EMPTY_WINDOWS,
    BATCH_CONSUMER_PROCESSING_DURATION_MS, BATCH_CONSUMER_PROCESSING_FAILURES,
};
use crate::processor::BatchProcessor;
use crate::source::MessageSource;

/// Why an accumulation cycle stopped
#[derive(Debug)]
enum CycleEnd {
    Full,
    Deadline,
    Closed,
    Cancelled,
    Failed(SourceError),
}

impl CycleEnd {
    fn reason(&self) -> &'static str {
        match self {
            CycleEnd::Full => "size",
            CycleEnd::Deadline => "deadline",
            CycleEnd::Closed => "closed",
            CycleEnd::Cancelled => "cancelled",
            CycleEnd::Failed(_) => "error",
        }
    }
}

pub struct BatchConsumptionLoop<D: Decoder> {
    config: BatchConfig,
    decoder: D,
    processor: Arc<dyn BatchProcessor<D::Output>>,
    commits: CommitCoordinator,
    shutdown: CancellationToken,
}

impl<D: Decoder> BatchConsumptionLoop<D> {
    pub fn new(
        config: BatchConfig,
        decoder: D,
        processor: Arc<dyn BatchProcessor<D::Output>>,
        committer: Arc<dyn OffsetCommitter>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            decoder,
            processor,
            commits: CommitCoordinator::new(committer),
            shutdown,
        }
    }

    /// Consume `source` until it closes, fails, or the loop is cancelled.
    ///
    /// Returns `Ok(())` on closure or cancellation, after flushing any pending
    /// batch. Processor failures, commit failures and stream errors are
    /// returned as errors; a stream error is returned only after the pending
    /// batch has been flushed.
    pub async fn run<S: MessageSource>(mut self, mut source: S) -> Result<(), ConsumerError> {
        debug!(
            max_batch_size = self.config.max_batch_size(),
            max_batch_duration_ms = self.config.max_batch_duration().as_millis() as u64,
            "Starting batch consumption loop"
        );

        loop {
            let mut accumulator = BatchAccumulator::new(&self.config);
            let end = self.accumulate(&mut source, &mut accumulator).await;
            let reason = end.reason();

            let terminal = match end {
                CycleEnd::Full | CycleEnd::Deadline => None,
                CycleEnd::Closed | CycleEnd::Cancelled => Some(Ok(())),
                CycleEnd::Failed(e) => Some(Err(ConsumerError::from(e))),
            };

            if accumulator.is_empty() {
                if terminal.is_none() {
                    metrics::counter!(BATCH_CONSUMER_EMPTY_WINDOWS).increment(1);
                }
            } else {
                let cycle = accumulator.elapsed();
                self.flush(accumulator.into_batch(), reason, cycle).await?;
            }

            if let Some(result) = terminal {
                match &result {
                    Ok(()) => info!(reason, "Batch consumption loop finished"),
                    Err(e) => error!(reason, error = %e, "Batch consumption loop stopped by stream error"),
                }
                return result;
            }
        }
    }

    async fn accumulate<S: MessageSource>(
        &self,
        source: &mut S,
        accumulator: &mut BatchAccumulator<D::Output>,
    ) -> CycleEnd {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    return CycleEnd::Cancelled;
                }

                _ = sleep_until(accumulator.deadline()) => {
                    return CycleEnd::Deadline;
                }

                next = source.next_message() => {
                    match next {
                        Some(Ok(message)) => {
                            if let Some(value) = self.decode(&message) {
                                if accumulator.push(message, value) {
                                    return CycleEnd::Full;
                                }
                            }
                        }
                        Some(Err(e)) => return CycleEnd::Failed(e),
                        None => return CycleEnd::Closed,
                    }
                }
            }
        }
    }

    fn decode(&self, message: &RawMessage) -> Option<D::Output> {
        match self.decoder.decode_message(message) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    topic = message.topic(),
                    partition = message.partition_number(),
                    offset = message.offset(),
                    error = %e,
                    "Failed to decode message - skipping"
                );
                metrics::counter!(BATCH_CONSUMER_DECODE_FAILURES).increment(1);
                None
            }
        }
    }

    async fn flush(
        &mut self,
        batch: Batch<D::Output>,
        reason: &'static str,
        cycle: Duration,
    ) -> Result<(), ConsumerError> {
        // compute the commit coordinates before handing the batch over
        let (Some(marker), Some(first_offset)) = (batch.commit_marker(), batch.first_offset())
        else {
            return Ok(());
        };
        let message_count = batch.len();

        debug!(
            topic = marker.partition().topic(),
            partition = marker.partition().partition_number(),
            message_count,
            first_offset,
            last_offset = marker.offset(),
            reason,
            cycle_ms = cycle.as_millis() as u64,
            "Flushing batch"
        );
        metrics::counter!(BATCH_CONSUMER_BATCHES_FLUSHED, "reason" => reason).increment(1);
        metrics::histogram!(BATCH_CONSUMER_BATCH_SIZE).record(message_count as f64);
        metrics::histogram!(BATCH_CONSUMER_BATCH_FILL_RATIO)
            .record(message_count as f64 / self.config.max_batch_size() as f64);

        let start = Instant::now();
        let result = self.processor.process_batch(batch).await;
        metrics::histogram!(BATCH_CONSUMER_PROCESSING_DURATION_MS)
            .record(start.elapsed().as_millis() as f64);

        if let Err(e) = result {
            error!(
                topic = marker.partition().topic(),
                partition = marker.partition().partition_number(),
                message_count,
                first_offset,
                last_offset = marker.offset(),
                error = %e,
                error_chain = ?e,
                "Error processing batch - offset not advanced"
            );
            metrics::counter!(BATCH_CONSUMER_PROCESSING_FAILURES).increment(1);
            return Err(ConsumerError::Processing {
                partition: marker.partition().clone(),
                first_offset,
                last_offset: marker.offset(),
                source: e,
            });
        }

        if let Err(e) = self.commits.commit_marker(marker) {
            error!(error = %e, "Failed to commit processed batch");
            return Err(e.into());
        }

        Ok(())
    }
}
