//! Periodic re-enqueue of the managed key.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::key::ObjectKey;
use crate::queue::WorkQueue;
use crate::shutdown;

/// Adds `key` to the queue immediately and then every `period`, so the
/// object is re-validated even when no watch event arrives.
pub struct ResyncTimer {
    key: ObjectKey,
    period: Duration,
    queue: Arc<WorkQueue<ObjectKey>>,
}

impl ResyncTimer {
    pub fn new(key: ObjectKey, period: Duration, queue: Arc<WorkQueue<ObjectKey>>) -> Self {
        Self { key, period, queue }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(key = %self.key, period = ?self.period, "Starting resync timer");
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!(key = %self.key, "Resync");
                    self.queue.add(self.key.clone());
                }
                _ = shutdown::requested(&mut shutdown) => break,
            }
        }

        debug!(key = %self.key, "Resync timer stopped");
    }
}
