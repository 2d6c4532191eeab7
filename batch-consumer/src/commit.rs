use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::CommitError;
use crate::message::RawMessage;
use crate::metrics_consts::{BATCH_CONSUMER_COMMIT_FAILURES, BATCH_CONSUMER_OFFSETS_COMMITTED};
use crate::types::Partition;

/// The last message of a successfully processed batch. Committing it
/// acknowledges every offset up to and including `offset` on its partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitMarker {
    partition: Partition,
    offset: i64,
}

impl CommitMarker {
    pub fn new(partition: Partition, offset: i64) -> Self {
        Self { partition, offset }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// The position a consumer resumes from after this commit
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }
}

impl From<&RawMessage> for CommitMarker {
    fn from(message: &RawMessage) -> Self {
        Self::new(message.partition().clone(), message.offset())
    }
}

/// The stream's acknowledgement mechanism
pub trait OffsetCommitter: Send + Sync {
    fn commit(&self, marker: &CommitMarker) -> Result<(), CommitError>;
}

/// Advances the acknowledged position once per successful batch. Owned by a
/// single consumption loop, so the positions it tracks have one writer.
pub struct CommitCoordinator {
    committer: Arc<dyn OffsetCommitter>,
    committed: HashMap<Partition, i64>,
}

impl CommitCoordinator {
    pub fn new(committer: Arc<dyn OffsetCommitter>) -> Self {
        Self {
            committer,
            committed: HashMap::new(),
        }
    }

    /// Commit the last message of a successfully processed batch.
    pub fn commit(&mut self, last_message: &RawMessage) -> Result<CommitMarker, CommitError> {
        self.commit_marker(CommitMarker::from(last_message))
    }

    pub fn commit_marker(&mut self, marker: CommitMarker) -> Result<CommitMarker, CommitError> {
        if let Some(&committed) = self.committed.get(marker.partition()) {
            if marker.offset() <= committed {
                metrics::counter!(BATCH_CONSUMER_COMMIT_FAILURES, "reason" => "regression")
                    .increment(1);
                return Err(CommitError::Regression {
                    partition: marker.partition().clone(),
                    committed,
                    attempted: marker.offset(),
                });
            }
        }

        if let Err(e) = self.committer.commit(&marker) {
            metrics::counter!(BATCH_CONSUMER_COMMIT_FAILURES, "reason" => "committer").increment(1);
            return Err(e);
        }

        debug!(
            topic = marker.partition().topic(),
            partition = marker.partition().partition_number(),
            offset = marker.offset(),
            "Committed batch offset"
        );
        metrics::counter!(BATCH_CONSUMER_OFFSETS_COMMITTED).increment(1);
        self.committed
            .insert(marker.partition().clone(), marker.offset());

        Ok(marker)
    }

    /// Offset of the last message committed on `partition` by this coordinator
    pub fn committed(&self, partition: &Partition) -> Option<i64> {
        self.committed.get(partition).copied()
    }
}
