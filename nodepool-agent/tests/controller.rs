//! End-to-end tests of the control loop on the in-memory backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{GIB, NAMESPACE, NODE, NODE_UID, eventually, inventory, key, node_owner};
use nodepool_agent::backend::memory::MemoryBackend;
use nodepool_agent::prober::StaticProber;
use nodepool_agent::{
    BackendError, Config, Controller, ControllerError, InventoryBackend, ObjectKey, Pool,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Running {
    backend: Arc<MemoryBackend>,
    prober: Arc<StaticProber>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Result<(), ControllerError>>,
}

impl Running {
    fn start(backend: Arc<MemoryBackend>, pools: Vec<Pool>, resync: Duration) -> Self {
        let prober = Arc::new(StaticProber::new(pools));

        let mut config = Config::new(NAMESPACE, NODE, NODE_UID);
        config.workers = 2;
        config.resync_interval = resync;
        config.cache_sync_timeout = Duration::from_secs(2);
        config.call_timeout = Duration::from_secs(1);
        config.rate_limit_base = Duration::from_millis(5);
        config.rate_limit_max = Duration::from_millis(100);

        let controller = Controller::new(config, backend.clone(), prober.clone()).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(shutdown_rx));

        Self {
            backend,
            prober,
            shutdown_tx,
            handle,
        }
    }

    fn pools(&self) -> Option<Vec<Pool>> {
        self.backend.object(&key()).map(|o| o.spec.pools)
    }

    async fn stop(self) {
        self.shutdown_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), self.handle)
            .await
            .expect("controller did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}

#[tokio::test]
async fn test_creates_inventory_on_start() {
    let pools = vec![Pool::new("pool-a", "uuid-1", 100 * GIB)];
    let running = Running::start(Arc::new(MemoryBackend::new()), pools.clone(), Duration::from_secs(60));

    eventually(|| running.pools().as_ref() == Some(&pools)).await;
    let stored = running.backend.object(&key()).unwrap();
    assert_eq!(
        stored.metadata.owner_references,
        Some(vec![node_owner(NODE_UID, true)])
    );

    running.stop().await;
}

#[tokio::test]
async fn test_steady_state_does_not_write() {
    let pools = vec![Pool::new("pool-a", "uuid-1", GIB)];
    let running = Running::start(Arc::new(MemoryBackend::new()), pools.clone(), Duration::from_millis(20));

    eventually(|| running.pools().as_ref() == Some(&pools)).await;
    let writes = running.backend.writes();

    // Several resyncs later nothing has been written.
    eventually(|| running.prober.calls() > 5).await;
    assert_eq!(running.backend.writes(), writes);

    running.stop().await;
}

#[tokio::test]
async fn test_resync_picks_up_pool_changes() {
    let running = Running::start(
        Arc::new(MemoryBackend::new()),
        vec![Pool::new("pool-a", "uuid-1", 100 * GIB)],
        Duration::from_millis(50),
    );
    eventually(|| running.pools().is_some()).await;

    let changed = vec![Pool::new("pool-a", "uuid-1", 90 * GIB)];
    running.prober.set(Ok(changed.clone()));
    eventually(|| running.pools().as_ref() == Some(&changed)).await;

    running.stop().await;
}

#[tokio::test]
async fn test_external_changes_are_reverted() {
    let pools = vec![Pool::new("pool-a", "uuid-1", GIB)];
    let running = Running::start(Arc::new(MemoryBackend::new()), pools.clone(), Duration::from_secs(60));
    eventually(|| running.pools().as_ref() == Some(&pools)).await;

    // Someone else rewrites the pools; the watch event triggers a pass.
    let mut tampered = running.backend.object(&key()).unwrap();
    let rv = tampered.metadata.resource_version.clone().unwrap();
    tampered.spec.pools = vec![Pool::new("bogus", "0", 1)];
    running.backend.update(&tampered, &rv).await.unwrap();

    eventually(|| running.pools().as_ref() == Some(&pools)).await;

    running.stop().await;
}

#[tokio::test]
async fn test_deleted_inventory_is_recreated() {
    let pools = vec![Pool::new("pool-a", "uuid-1", GIB)];
    let running = Running::start(Arc::new(MemoryBackend::new()), pools.clone(), Duration::from_secs(60));
    eventually(|| running.pools().is_some()).await;
    let first_uid = running.backend.object(&key()).unwrap().metadata.uid;

    running.backend.delete(&key()).unwrap();

    eventually(|| {
        running
            .backend
            .object(&key())
            .is_some_and(|o| o.metadata.uid != first_uid)
    })
    .await;
    assert_eq!(running.pools(), Some(pools));

    running.stop().await;
}

#[tokio::test]
async fn test_transient_write_errors_are_retried() {
    let backend = Arc::new(MemoryBackend::new());
    for _ in 0..3 {
        backend.push_write_error(BackendError::Transient("unavailable".to_string()));
    }

    let pools = vec![Pool::new("pool-a", "uuid-1", GIB)];
    let running = Running::start(backend, pools.clone(), Duration::from_secs(60));

    eventually(|| running.pools().as_ref() == Some(&pools)).await;
    assert_eq!(running.backend.writes(), 1);

    running.stop().await;
}

#[tokio::test]
async fn test_other_objects_are_left_alone() {
    let backend = Arc::new(MemoryBackend::new());
    let other = backend
        .create(&inventory("node-2", Vec::new(), Vec::new()))
        .await
        .unwrap();

    let pools = vec![Pool::new("pool-a", "uuid-1", GIB)];
    let running = Running::start(backend, pools.clone(), Duration::from_millis(20));
    eventually(|| running.pools().as_ref() == Some(&pools)).await;
    eventually(|| running.prober.calls() > 3).await;

    let untouched = running
        .backend
        .object(&ObjectKey::new(NAMESPACE, "node-2"))
        .unwrap();
    assert_eq!(untouched, other);

    running.stop().await;
}

#[tokio::test]
async fn test_cache_sync_timeout_aborts_run() {
    let backend = Arc::new(MemoryBackend::new());
    for _ in 0..1000 {
        backend.push_list_error(BackendError::Transient("unavailable".to_string()));
    }

    let mut config = Config::new(NAMESPACE, NODE, NODE_UID);
    config.cache_sync_timeout = Duration::from_millis(100);
    let controller =
        Controller::new(config, backend, Arc::new(StaticProber::new(Vec::new()))).unwrap();

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let result = controller.run(shutdown_rx).await;
    assert!(matches!(result, Err(ControllerError::CacheSyncTimeout(_))));
}
