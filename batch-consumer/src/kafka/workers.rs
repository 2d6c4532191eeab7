use std::collections::HashMap;
use std::future::Future;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ConsumerError;
use crate::kafka::context::AssignmentTokens;
use crate::types::Partition;

/// What a partition task hands back when it ends
struct WorkerExit {
    partition: Partition,
    generation: u64,
    result: Result<(), ConsumerError>,
}

struct PartitionWorker {
    token: CancellationToken,
    generation: u64,
}

/// The partition workers of one consumer, one task per assigned partition.
///
/// Every worker gets a generation number when spawned. An exit is judged
/// against the worker currently registered for its partition: a failure of
/// that worker while its token is live is returned, anything else (revoked,
/// or replaced by a newer generation) is only logged.
pub struct WorkerSet {
    tasks: JoinSet<WorkerExit>,
    workers: HashMap<Partition, PartitionWorker>,
    assignments: AssignmentTokens,
    next_generation: u64,
}

impl WorkerSet {
    pub fn new(assignments: AssignmentTokens) -> Self {
        Self {
            tasks: JoinSet::new(),
            workers: HashMap::new(),
            assignments,
            next_generation: 0,
        }
    }

    /// Number of tasks not yet collected, including revoked ones still flushing
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, partition: &Partition) -> bool {
        self.workers.contains_key(partition)
    }

    /// Register `token` as the partition's assignment token and run `work` for it
    pub fn spawn<F>(&mut self, partition: Partition, token: CancellationToken, work: F)
    where
        F: Future<Output = Result<(), ConsumerError>> + Send + 'static,
    {
        if let Some(stale) = self.assignments.insert(partition.clone(), token.clone()) {
            stale.cancel();
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        self.workers.insert(
            partition.clone(),
            PartitionWorker {
                token,
                generation,
            },
        );
        self.tasks.spawn(async move {
            info!(
                topic = partition.topic(),
                partition = partition.partition_number(),
                generation,
                "Starting partition worker"
            );
            let result = work.await;
            WorkerExit {
                partition,
                generation,
                result,
            }
        });
    }

    /// Cancel the partition's current worker, if any, and wait until it has
    /// exited so its queue is released. Other workers exiting meanwhile are
    /// judged as usual.
    pub async fn replace(&mut self, partition: &Partition) -> Result<(), ConsumerError> {
        let Some(previous) = self.workers.remove(partition) else {
            return Ok(());
        };
        previous.token.cancel();

        while let Some(joined) = self.tasks.join_next().await {
            let done = matches!(
                &joined,
                Ok(exit) if exit.partition == *partition && exit.generation == previous.generation
            );
            self.finish(joined)?;
            if done {
                break;
            }
        }
        Ok(())
    }

    /// Wait for the next worker to exit. `None` when no worker is running.
    ///
    /// Cancel safe: nothing is awaited after the task is collected.
    pub async fn join_next(&mut self) -> Option<Result<(), ConsumerError>> {
        let joined = self.tasks.join_next().await?;
        Some(self.finish(joined))
    }

    fn finish(&mut self, joined: Result<WorkerExit, JoinError>) -> Result<(), ConsumerError> {
        let WorkerExit {
            partition,
            generation,
            result,
        } = match joined {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %e, "Partition worker panicked or was aborted");
                return Err(e.into());
            }
        };

        let live = match self.workers.get(&partition) {
            Some(worker) if worker.generation == generation => {
                let live = !worker.token.is_cancelled();
                self.workers.remove(&partition);
                if live {
                    self.assignments.remove(&partition);
                }
                live
            }
            _ => false,
        };

        match result {
            Ok(()) => {
                info!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    generation,
                    "Partition worker finished"
                );
                Ok(())
            }
            Err(e) if !live => {
                warn!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    generation,
                    error = %e,
                    "Revoked partition worker failed, uncommitted messages go to the next owner"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    generation,
                    error = %e,
                    "Partition worker failed"
                );
                Err(e)
            }
        }
    }

    /// Wait for every worker to exit. Their tokens must already be cancelled.
    /// Returns the first failure, revoked or not, since a failed final flush
    /// left its batch uncommitted.
    pub async fn shutdown(&mut self) -> Result<(), ConsumerError> {
        self.workers.clear();
        self.assignments.clear();

        let mut outcome = Ok(());
        while let Some(joined) = self.tasks.join_next().await {
            let result = match joined {
                Ok(exit) => exit.result.map_err(|e| {
                    error!(
                        topic = exit.partition.topic(),
                        partition = exit.partition.partition_number(),
                        error = %e,
                        "Partition worker failed during shutdown"
                    );
                    e
                }),
                Err(e) => Err(ConsumerError::from(e)),
            };
            if let Err(e) = result {
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::anyhow;
    use dashmap::DashMap;

    use super::*;

    fn processing_error(partition: &Partition) -> ConsumerError {
        ConsumerError::Processing {
            partition: partition.clone(),
            first_offset: 0,
            last_offset: 4,
            source: anyhow!("downstream unavailable"),
        }
    }

    async fn fail_with(error: ConsumerError) -> Result<(), ConsumerError> {
        Err(error)
    }

    // flush fails once the worker is told to stop
    async fn fail_when_cancelled(
        token: CancellationToken,
        error: ConsumerError,
    ) -> Result<(), ConsumerError> {
        token.cancelled().await;
        Err(error)
    }

    async fn finish_when_cancelled(token: CancellationToken) -> Result<(), ConsumerError> {
        token.cancelled().await;
        Ok(())
    }

    async fn crash() -> Result<(), ConsumerError> {
        panic!("worker bug")
    }

    #[tokio::test]
    async fn test_failure_of_owned_worker_is_returned() {
        let assignments: AssignmentTokens = Arc::new(DashMap::new());
        let mut workers = WorkerSet::new(assignments.clone());
        let partition = Partition::new("events", 0);

        for _ in 0..50 {
            let error = processing_error(&partition);
            workers.spawn(partition.clone(), CancellationToken::new(), fail_with(error));
            assert!(assignments.contains_key(&partition));

            let result = workers.join_next().await.unwrap();
            assert!(matches!(result, Err(ConsumerError::Processing { .. })));
            assert!(!workers.contains(&partition));
            assert!(!assignments.contains_key(&partition));
        }
        assert!(workers.join_next().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_owned_failure_is_returned_on_multi_thread_runtime() {
        let assignments: AssignmentTokens = Arc::new(DashMap::new());
        let mut workers = WorkerSet::new(assignments);

        for n in 0..200 {
            let partition = Partition::new("events", n);
            let error = processing_error(&partition);
            workers.spawn(partition, CancellationToken::new(), fail_with(error));
        }

        let mut failures = 0;
        while let Some(result) = workers.join_next().await {
            assert!(result.is_err());
            failures += 1;
        }
        assert_eq!(failures, 200);
    }

    #[tokio::test]
    async fn test_failure_of_revoked_worker_is_only_logged() {
        let assignments: AssignmentTokens = Arc::new(DashMap::new());
        let mut workers = WorkerSet::new(assignments.clone());
        let partition = Partition::new("events", 1);
        let token = CancellationToken::new();

        let error = processing_error(&partition);
        workers.spawn(
            partition.clone(),
            token.clone(),
            fail_when_cancelled(token, error),
        );

        // what the rebalance callback does on revoke
        let (_, revoked) = assignments.remove(&partition).unwrap();
        revoked.cancel();

        assert!(workers.join_next().await.unwrap().is_ok());
        assert!(!workers.contains(&partition));
    }

    #[tokio::test]
    async fn test_replace_waits_for_previous_generation() {
        let assignments: AssignmentTokens = Arc::new(DashMap::new());
        let mut workers = WorkerSet::new(assignments.clone());
        let partition = Partition::new("events", 2);

        let first_token = CancellationToken::new();
        let error = processing_error(&partition);
        workers.spawn(
            partition.clone(),
            first_token.clone(),
            fail_when_cancelled(first_token.clone(), error),
        );

        // the old worker's failed flush does not count against the new assignment
        workers.replace(&partition).await.unwrap();
        assert!(first_token.is_cancelled());
        assert!(workers.is_empty());

        let second_token = CancellationToken::new();
        workers.spawn(
            partition.clone(),
            second_token.clone(),
            finish_when_cancelled(second_token.clone()),
        );
        assert!(workers.contains(&partition));
        assert!(!second_token.is_cancelled());

        second_token.cancel();
        assert!(workers.join_next().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_reports_failed_final_flush() {
        let assignments: AssignmentTokens = Arc::new(DashMap::new());
        let mut workers = WorkerSet::new(assignments.clone());
        let parent = CancellationToken::new();

        for n in 0..3 {
            let partition = Partition::new("events", n);
            let token = parent.child_token();
            if n == 1 {
                let error = processing_error(&partition);
                workers.spawn(partition, token.clone(), fail_when_cancelled(token, error));
            } else {
                workers.spawn(partition, token.clone(), finish_when_cancelled(token));
            }
        }
        assert_eq!(workers.len(), 3);

        parent.cancel();
        let err = workers.shutdown().await.unwrap_err();
        assert!(matches!(err, ConsumerError::Processing { .. }));
        assert!(workers.is_empty());
        assert!(assignments.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_worker_is_fatal() {
        let assignments: AssignmentTokens = Arc::new(DashMap::new());
        let mut workers = WorkerSet::new(assignments);

        workers.spawn(Partition::new("events", 3), CancellationToken::new(), crash());

        let result = workers.join_next().await.unwrap();
        assert!(matches!(result, Err(ConsumerError::Worker(_))));
    }
}
