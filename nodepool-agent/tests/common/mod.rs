//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use nodepool_agent::backend::memory::MemoryBackend;
use nodepool_agent::cache::Informer;
use nodepool_agent::prober::StaticProber;
use nodepool_agent::reconciler::Reconciler;
use nodepool_agent::scheme;
use nodepool_agent::{
    InventoryReconciler, ObjectKey, Pool, PoolInventory, PoolInventorySpec, ReconcileError,
    ReconcileOutcome,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const NAMESPACE: &str = "openebs";
pub const NODE: &str = "node-1";
pub const NODE_UID: &str = "uid-1";

pub const GIB: u64 = 1024 * 1024 * 1024;

pub fn key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, NODE)
}

pub fn node_owner(uid: &str, controller: bool) -> OwnerReference {
    scheme::add_to_scheme().unwrap();
    scheme::global()
        .owner_reference("Node", NODE, uid, controller)
        .unwrap()
}

pub fn inventory(name: &str, pools: Vec<Pool>, owners: Vec<OwnerReference>) -> PoolInventory {
    let mut obj = PoolInventory::new(name, PoolInventorySpec { pools });
    obj.metadata.namespace = Some(NAMESPACE.to_string());
    obj.metadata.owner_references = (!owners.is_empty()).then_some(owners);
    obj
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// A reconciler over a memory backend, with an informer keeping its cache
/// current.
pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub prober: Arc<StaticProber>,
    pub informer: Arc<Informer>,
    pub reconciler: InventoryReconciler,
    shutdown_tx: watch::Sender<bool>,
    informer_task: JoinHandle<()>,
}

impl Harness {
    pub async fn spawn(pools: Vec<Pool>) -> Self {
        Self::spawn_with(Arc::new(MemoryBackend::new()), pools).await
    }

    /// Start on a backend that may already hold objects.
    pub async fn spawn_with(backend: Arc<MemoryBackend>, pools: Vec<Pool>) -> Self {
        let prober = Arc::new(StaticProber::new(pools));
        let informer = Arc::new(Informer::new(backend.clone(), NAMESPACE));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let informer_task = {
            let informer = Arc::clone(&informer);
            tokio::spawn(async move { informer.run(shutdown_rx).await })
        };
        assert!(informer.wait_for_sync(Duration::from_secs(2)).await);

        let reconciler = InventoryReconciler::new(
            backend.clone(),
            prober.clone(),
            informer.store(),
            node_owner(NODE_UID, true),
            Duration::from_secs(1),
        );

        Self {
            backend,
            prober,
            informer,
            reconciler,
            shutdown_tx,
            informer_task,
        }
    }

    /// Wait until the cache has seen the latest stored version of the key.
    pub async fn wait_for_cache(&self) {
        let store = self.informer.store();
        eventually(|| {
            let stored = self
                .backend
                .object(&key())
                .and_then(|o| o.metadata.resource_version);
            let cached = store
                .get(&key())
                .and_then(|o| o.metadata.resource_version.clone());
            stored == cached
        })
        .await;
    }

    /// Reconcile the node key against an up-to-date cache.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, ReconcileError> {
        self.wait_for_cache().await;
        self.reconciler.reconcile(&key()).await
    }

    pub fn stored(&self) -> PoolInventory {
        self.backend.object(&key()).expect("inventory not stored")
    }

    pub async fn shutdown(self) {
        self.shutdown_tx.send(true).unwrap();
        self.informer_task.await.unwrap();
    }
}
