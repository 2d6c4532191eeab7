use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::batch::Batch;
use crate::commit::{CommitMarker, OffsetCommitter};
use crate::error::CommitError;
use crate::message::RawMessage;
use crate::processor::BatchProcessor;
use crate::types::Partition;

/// Build a message carrying a UTF-8 payload
pub fn json_message(topic: &str, partition: i32, offset: i64, payload: &str) -> RawMessage {
    RawMessage::new(
        Partition::new(topic, partition),
        offset,
        Some(payload.as_bytes().to_vec()),
    )
}

/// Committer that remembers every marker it was asked to commit
#[derive(Default)]
pub struct RecordingCommitter {
    markers: Mutex<Vec<CommitMarker>>,
    fail_next: AtomicBool,
}

impl RecordingCommitter {
    /// Make the next commit call fail without recording it
    pub fn fail_next_commit(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn markers(&self) -> Vec<CommitMarker> {
        self.markers.lock().unwrap().clone()
    }

    pub fn offsets(&self) -> Vec<i64> {
        self.markers().iter().map(|m| m.offset()).collect()
    }

    pub fn last_committed(&self, partition: &Partition) -> Option<i64> {
        self.markers()
            .iter()
            .rev()
            .find(|m| m.partition() == partition)
            .map(|m| m.offset())
    }
}

impl OffsetCommitter for RecordingCommitter {
    fn commit(&self, marker: &CommitMarker) -> Result<(), CommitError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CommitError::Other("simulated commit failure".to_string()));
        }
        self.markers.lock().unwrap().push(marker.clone());
        Ok(())
    }
}

/// One processor invocation as seen by a `RecordingProcessor`
#[derive(Debug, Clone)]
pub struct RecordedBatch<T> {
    pub offsets: Vec<i64>,
    pub values: Vec<T>,
    pub received_at: Instant,
    pub succeeded: bool,
}

/// Processor that records every batch it receives and can be told to fail
pub struct RecordingProcessor<T> {
    batches: Mutex<Vec<RecordedBatch<T>>>,
    calls: AtomicUsize,
    fail_on_call: Option<usize>,
    notify: Notify,
}

impl<T> Default for RecordingProcessor<T> {
    fn default() -> Self {
        Self {
            batches: Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
            fail_on_call: None,
            notify: Notify::new(),
        }
    }
}

impl<T: Clone> RecordingProcessor<T> {
    /// Fail the `call`-th invocation (1-based), succeed on all others
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn batches(&self) -> Vec<RecordedBatch<T>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_offsets(&self) -> Vec<Vec<i64>> {
        self.batches().into_iter().map(|b| b.offsets).collect()
    }

    /// Wait until at least `count` batches were handed to the processor
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.call_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl<T> BatchProcessor<T> for RecordingProcessor<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn process_batch(&self, batch: Batch<T>) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let succeeded = self.fail_on_call != Some(call);

        let (messages, values) = batch.unpack();
        self.batches.lock().unwrap().push(RecordedBatch {
            offsets: messages.iter().map(|m| m.offset()).collect(),
            values,
            received_at: Instant::now(),
            succeeded,
        });
        self.notify.notify_waiters();

        if succeeded {
            Ok(())
        } else {
            Err(anyhow!("simulated processor error on call {call}"))
        }
    }
}
