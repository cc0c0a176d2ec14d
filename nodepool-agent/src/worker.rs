//! Worker pool draining the work queue.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::key::ObjectKey;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::shutdown;

/// Calls `done` for its key when dropped, so the key is released on every
/// exit path of a worker iteration.
struct DoneGuard<'a> {
    queue: &'a WorkQueue<ObjectKey>,
    key: ObjectKey,
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Start `count` workers. They exit when the queue shuts down; a reconcile
/// still running when `shutdown` fires is abandoned.
pub fn spawn_workers(
    count: usize,
    queue: Arc<WorkQueue<ObjectKey>>,
    reconciler: Arc<dyn Reconciler>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            tokio::spawn(run_worker(
                id,
                Arc::clone(&queue),
                Arc::clone(&reconciler),
                shutdown.clone(),
            ))
        })
        .collect()
}

async fn run_worker(
    id: usize,
    queue: Arc<WorkQueue<ObjectKey>>,
    reconciler: Arc<dyn Reconciler>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker = id, "Worker started");

    while let Some(key) = queue.get().await {
        let _guard = DoneGuard {
            queue: &queue,
            key: key.clone(),
        };

        let result = tokio::select! {
            result = AssertUnwindSafe(reconciler.reconcile(&key)).catch_unwind() => result,
            _ = shutdown::requested(&mut shutdown) => {
                info!(worker = id, key = %key, "Abandoning reconcile on shutdown");
                break;
            }
        };

        match result {
            Ok(Ok(outcome)) => {
                debug!(worker = id, key = %key, ?outcome, "Reconciled");
                queue.forget(&key);
            }
            Ok(Err(e)) if e.is_retryable() => {
                warn!(
                    worker = id,
                    key = %key,
                    error = %e,
                    requeues = queue.num_requeues(&key),
                    "Reconcile failed, requeueing"
                );
                queue.add_rate_limited(key.clone());
            }
            Ok(Err(e)) => {
                error!(
                    worker = id,
                    key = %key,
                    error = %e,
                    requeues = queue.num_requeues(&key),
                    "Reconcile failed permanently, dropping key"
                );
                queue.forget(&key);
            }
            Err(panic) => {
                error!(
                    worker = id,
                    key = %key,
                    panic = panic_message(panic.as_ref()),
                    requeues = queue.num_requeues(&key),
                    "Reconcile panicked, requeueing"
                );
                queue.add_rate_limited(key.clone());
            }
        }
    }

    debug!(worker = id, "Worker stopped");
}
