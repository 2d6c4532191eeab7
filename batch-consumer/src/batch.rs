use std::time::Duration;

use tokio::time::Instant;

use crate::commit::CommitMarker;
use crate::config::BatchConfig;
use crate::message::RawMessage;

/// Messages and their decoded values, kept positionally aligned in arrival order.
#[derive(Debug)]
pub struct Batch<T> {
    messages: Vec<RawMessage>,
    values: Vec<T>,
}

impl<T> Batch<T> {
    pub fn new() -> Self {
        Self {
            messages: vec![],
            values: vec![],
        }
    }

    pub fn new_with_size_hint(hint: usize) -> Self {
        Self {
            messages: Vec::with_capacity(hint),
            values: Vec::with_capacity(hint),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[RawMessage] {
        &self.messages
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn first_offset(&self) -> Option<i64> {
        self.messages.first().map(|m| m.offset())
    }

    pub fn last_offset(&self) -> Option<i64> {
        self.messages.last().map(|m| m.offset())
    }

    pub fn last_message(&self) -> Option<&RawMessage> {
        self.messages.last()
    }

    /// Where the partition's committed position moves to once this batch succeeds
    pub fn commit_marker(&self) -> Option<CommitMarker> {
        self.last_message().map(CommitMarker::from)
    }

    /// Iterate over (message, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&RawMessage, &T)> {
        self.messages.iter().zip(self.values.iter())
    }

    // consume this Batch and return it's contents
    pub fn unpack(self) -> (Vec<RawMessage>, Vec<T>) {
        (self.messages, self.values)
    }

    fn push(&mut self, message: RawMessage, value: T) {
        self.messages.push(message);
        self.values.push(value);
    }
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One accumulation cycle: collects pairs until the batch is full or its
/// deadline passes. The deadline is armed when the cycle starts and re-armed
/// when the first pair is accepted, so a batch never lives longer than
/// `max_batch_duration` counted from its first message.
#[derive(Debug)]
pub struct BatchAccumulator<T> {
    batch: Batch<T>,
    max_size: usize,
    max_duration: Duration,
    started_at: Instant,
    deadline: Instant,
}

impl<T> BatchAccumulator<T> {
    pub fn new(config: &BatchConfig) -> Self {
        let started_at = Instant::now();
        Self {
            batch: Batch::new_with_size_hint(config.max_batch_size()),
            max_size: config.max_batch_size(),
            max_duration: config.max_batch_duration(),
            started_at,
            deadline: started_at + config.max_batch_duration(),
        }
    }

    /// Append a pair. Returns true once the size threshold is reached.
    pub fn push(&mut self, message: RawMessage, value: T) -> bool {
        if self.batch.is_empty() {
            self.deadline = Instant::now() + self.max_duration;
        }
        self.batch.push(message, value);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.batch.len() >= self.max_size
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time since the cycle started
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn into_batch(self) -> Batch<T> {
        self.batch
    }
}
