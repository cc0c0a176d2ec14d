//! Wires the informer, router, queue, resync timer and workers together.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backend::InventoryBackend;
use crate::cache::Informer;
use crate::config::Config;
use crate::error::ControllerError;
use crate::key::ObjectKey;
use crate::prober::PoolProber;
use crate::queue::{ItemExponentialRateLimiter, WorkQueue};
use crate::reconciler::InventoryReconciler;
use crate::resync::ResyncTimer;
use crate::router::EventRouter;
use crate::scheme;
use crate::shutdown;
use crate::worker::spawn_workers;

/// Owner kind of every inventory object.
const OWNER_KIND: &str = "Node";

/// Control loop for one node's `PoolInventory`.
pub struct Controller {
    config: Config,
    backend: Arc<dyn InventoryBackend>,
    prober: Arc<dyn PoolProber>,
}

impl Controller {
    pub fn new(
        config: Config,
        backend: Arc<dyn InventoryBackend>,
        prober: Arc<dyn PoolProber>,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            prober,
        })
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    ///
    /// Fails only if the registry cannot be set up or the cache does not
    /// sync within the configured timeout.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ControllerError> {
        let Config {
            scope,
            owner,
            workers,
            resync_interval,
            cache_sync_timeout,
            call_timeout,
            rate_limit_base,
            rate_limit_max,
        } = self.config;

        scheme::add_to_scheme()?;
        let owner_ref = scheme::global()
            .owner_reference(OWNER_KIND, &owner.name, &owner.uid, owner.controller)
            .map_err(ControllerError::Owner)?;

        let key = scope.key();
        info!(key = %key, owner = %owner.name, workers, "Starting controller");

        let queue = WorkQueue::new(ItemExponentialRateLimiter::new(
            rate_limit_base,
            rate_limit_max,
        ));
        let router = Arc::new(EventRouter::new(scope.clone(), Arc::clone(&queue)));

        let mut informer = Informer::new(Arc::clone(&self.backend), scope.namespace.clone());
        informer.add_handler(router.clone());
        let informer = Arc::new(informer);

        // Internal stop signal, so startup failures can stop what was started.
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        tasks.push(tokio::spawn({
            let informer = Arc::clone(&informer);
            let stop_rx = stop_rx.clone();
            async move { informer.run(stop_rx).await }
        }));

        let synced = tokio::select! {
            synced = informer.wait_for_sync(cache_sync_timeout) => Some(synced),
            _ = shutdown::requested(&mut shutdown) => None,
        };

        match synced {
            Some(true) => {}
            Some(false) => {
                error!(timeout = ?cache_sync_timeout, "Cache did not sync");
                stop(stop_tx, &queue, tasks).await;
                return Err(ControllerError::CacheSyncTimeout(cache_sync_timeout));
            }
            None => {
                info!("Shutdown requested before cache sync");
                stop(stop_tx, &queue, tasks).await;
                return Ok(());
            }
        }

        let reconciler = Arc::new(InventoryReconciler::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.prober),
            informer.store(),
            owner_ref,
            call_timeout,
        ));

        let timer = ResyncTimer::new(key.clone(), resync_interval, Arc::clone(&queue));
        tasks.push(tokio::spawn(timer.run(stop_rx.clone())));
        tasks.extend(spawn_workers(
            workers,
            Arc::clone(&queue),
            reconciler,
            stop_rx,
        ));

        shutdown::requested(&mut shutdown).await;
        info!(key = %key, "Shutting down controller");

        stop(stop_tx, &queue, tasks).await;

        let dropped = router.dropped_events();
        if dropped > 0 {
            warn!(dropped, "Events outside the configured scope were ignored");
        }
        info!(key = %key, "Controller stopped");
        Ok(())
    }
}

async fn stop(
    stop_tx: watch::Sender<bool>,
    queue: &WorkQueue<ObjectKey>,
    tasks: Vec<JoinHandle<()>>,
) {
    stop_tx.send_replace(true);
    queue.shut_down();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Task ended abnormally");
        }
    }
}
