//! Bounded queue of operation ids drained by a fixed set of workers.
//!
//! Each worker runs one operation at a time. The store's claim is the only
//! synchronization between workers; a lost race surfaces as `Conflict` and is skipped.

use std::sync::Arc;

use replica_core::{CopyError, CopyResult};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::orchestrator::CopyOrchestrator;

/// The pool has shut down and no longer accepts work.
#[derive(Debug, Error)]
#[error("copy worker pool closed")]
pub struct PoolClosed {
    /// Operation that could not be queued.
    pub operation_id: Uuid,
}

/// Fixed-size pool of copy workers fed by a bounded channel.
pub struct CopyWorkerPool {
    orchestrator: Arc<CopyOrchestrator>,
    sender: mpsc::Sender<Uuid>,
    workers: JoinSet<()>,
}

impl CopyWorkerPool {
    /// Start `workers` tasks reading from a queue holding up to `queue_depth` ids.
    ///
    /// Both sizes are raised to at least one.
    #[must_use]
    pub fn spawn(orchestrator: Arc<CopyOrchestrator>, workers: usize, queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let mut set = JoinSet::new();
        for index in 0..workers.max(1) {
            set.spawn(work(index, Arc::clone(&orchestrator), Arc::clone(&receiver)));
        }
        info!(workers = workers.max(1), queue_depth, "copy worker pool started");
        Self {
            orchestrator,
            sender,
            workers: set,
        }
    }

    /// Queue an operation, waiting for space when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`PoolClosed`] when every worker has exited.
    pub async fn submit(&self, operation_id: Uuid) -> Result<(), PoolClosed> {
        self.sender
            .send(operation_id)
            .await
            .map_err(|_| PoolClosed { operation_id })?;
        let depth = self.sender.max_capacity() - self.sender.capacity();
        self.orchestrator
            .metrics()
            .set_queue_depth(i64::try_from(depth).unwrap_or(i64::MAX));
        Ok(())
    }

    /// Queue up to `limit` claimable operations, returning how many were queued.
    ///
    /// # Errors
    ///
    /// Propagates store failures from listing claimable operations.
    pub async fn enqueue_claimable(&self, limit: i64) -> CopyResult<usize> {
        let mut queued = 0;
        for operation_id in self.orchestrator.claimable(limit).await? {
            if let Err(err) = self.submit(operation_id).await {
                warn!(operation_id = %err.operation_id, "worker pool closed while queueing");
                break;
            }
            queued += 1;
        }
        debug!(queued, "claimable operations queued");
        Ok(queued)
    }

    /// Close the queue and wait for workers to finish what was already queued.
    pub async fn shutdown(self) {
        let Self {
            orchestrator,
            sender,
            mut workers,
        } = self;
        drop(sender);
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "copy worker terminated abnormally");
            }
        }
        orchestrator.metrics().set_queue_depth(0);
        info!("copy worker pool stopped");
    }
}

async fn work(
    index: usize,
    orchestrator: Arc<CopyOrchestrator>,
    receiver: Arc<Mutex<mpsc::Receiver<Uuid>>>,
) {
    loop {
        let (next, depth) = {
            let mut queue = receiver.lock().await;
            let next = queue.recv().await;
            (next, queue.len())
        };
        orchestrator
            .metrics()
            .set_queue_depth(i64::try_from(depth).unwrap_or(i64::MAX));
        let Some(operation_id) = next else {
            break;
        };
        match orchestrator.run(operation_id).await {
            Ok(status) => {
                info!(worker = index, operation_id = %operation_id, status = %status, "copy run done");
            }
            Err(CopyError::Conflict { .. }) => {
                debug!(worker = index, operation_id = %operation_id, "operation claimed elsewhere");
            }
            Err(err) => {
                error!(
                    worker = index,
                    operation_id = %operation_id,
                    error = %err,
                    "copy run aborted"
                );
            }
        }
    }
    debug!(worker = index, "copy worker exiting");
}
