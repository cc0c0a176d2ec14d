//! Local cache of `PoolInventory` objects.
//!
//! The [`Informer`] keeps a [`Store`] in sync with the backend through a
//! list-then-watch loop and tells registered [`ResourceEventHandler`]s about
//! every change. Everything else only reads the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, InventoryBackend, WatchEvent};
use crate::backoff::ExponentialBackoff;
use crate::key::ObjectKey;
use crate::resource::PoolInventory;
use crate::shutdown;

const RELIST_BACKOFF_BASE: Duration = Duration::from_millis(200);
const RELIST_BACKOFF_MAX: Duration = Duration::from_secs(30);
/// A watch open at least this long counts as healthy even without events.
const MIN_HEALTHY_WATCH: Duration = Duration::from_secs(10);

/// Read replica of the backend objects of one namespace.
#[derive(Clone, Default)]
pub struct Store {
    objects: Arc<RwLock<HashMap<ObjectKey, Arc<PoolInventory>>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<PoolInventory>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn list(&self) -> Vec<Arc<PoolInventory>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: ObjectKey, obj: Arc<PoolInventory>) -> Option<Arc<PoolInventory>> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, obj)
    }

    fn remove(&self, key: &ObjectKey) -> Option<Arc<PoolInventory>> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Replace the whole contents, returning what was there before.
    fn replace(
        &self,
        objects: HashMap<ObjectKey, Arc<PoolInventory>>,
    ) -> HashMap<ObjectKey, Arc<PoolInventory>> {
        std::mem::replace(
            &mut *self.objects.write().unwrap_or_else(PoisonError::into_inner),
            objects,
        )
    }
}

/// Payload of a delete notification.
#[derive(Debug, Clone)]
pub enum DeletedObject {
    /// The watch delivered the final state of the object.
    Final(Arc<PoolInventory>),
    /// The delete was inferred from a relist; only the last cached state is
    /// known.
    Unknown {
        key: String,
        last_known: Arc<PoolInventory>,
    },
}

/// Receives cache change notifications. Called synchronously from the
/// informer task, so implementations must not block.
pub trait ResourceEventHandler: Send + Sync {
    fn on_add(&self, obj: &PoolInventory);
    fn on_update(&self, old: &PoolInventory, new: &PoolInventory);
    fn on_delete(&self, obj: &DeletedObject);
}

/// Keeps a [`Store`] in sync with one namespace of the backend.
pub struct Informer {
    backend: Arc<dyn InventoryBackend>,
    namespace: String,
    store: Store,
    handlers: Vec<Arc<dyn ResourceEventHandler>>,
    synced: AtomicBool,
    synced_notify: Notify,
}

impl Informer {
    pub fn new(backend: Arc<dyn InventoryBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            store: Store::new(),
            handlers: Vec::new(),
            synced: AtomicBool::new(false),
            synced_notify: Notify::new(),
        }
    }

    /// Register a handler. Handlers must be added before [`run`](Self::run).
    pub fn add_handler(&mut self, handler: Arc<dyn ResourceEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn store(&self) -> Store {
        self.store.clone()
    }

    /// True once the first list has been applied to the store.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Wait until the store has synced. Returns false on timeout.
    pub async fn wait_for_sync(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.synced_notify.notified();
                if self.has_synced() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Run the list-then-watch loop until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(namespace = %self.namespace, "Starting informer");
        let mut backoff = ExponentialBackoff::new(RELIST_BACKOFF_BASE, RELIST_BACKOFF_MAX);

        loop {
            tokio::select! {
                result = self.list_and_watch(&mut backoff) => {
                    if let Err(e) = result {
                        let delay = backoff.next();
                        warn!(namespace = %self.namespace, error = %e, ?delay, "List/watch failed, relisting");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown::requested(&mut shutdown) => break,
                        }
                    }
                }
                _ = shutdown::requested(&mut shutdown) => break,
            }
        }

        info!(namespace = %self.namespace, "Informer stopped");
    }

    /// One list followed by watches until the backend forces a relist.
    ///
    /// `backoff` is only reset by a healthy watch, so a backend that lists
    /// fine but keeps failing or closing watches still backs off.
    async fn list_and_watch(&self, backoff: &mut ExponentialBackoff) -> Result<(), BackendError> {
        let list = self.backend.list(&self.namespace).await?;
        let mut resource_version = list.resource_version.clone();
        self.apply_list(list.items);

        if !self.synced.swap(true, Ordering::AcqRel) {
            info!(namespace = %self.namespace, objects = self.store.len(), "Cache synced");
            self.synced_notify.notify_waiters();
        }

        loop {
            let started = Instant::now();
            let mut stream = self
                .backend
                .watch(&self.namespace, &resource_version)
                .await?;

            let mut delivered = false;
            while let Some(event) = stream.next().await {
                let event = event?;
                if let Some(rv) = event.object().metadata.resource_version.as_ref() {
                    resource_version = rv.clone();
                }
                self.apply_event(event);
                if !delivered {
                    delivered = true;
                    backoff.reset();
                }
            }

            if delivered || started.elapsed() >= MIN_HEALTHY_WATCH {
                backoff.reset();
                debug!(namespace = %self.namespace, %resource_version, "Watch ended, rewatching");
                tokio::task::yield_now().await;
            } else {
                let delay = backoff.next();
                debug!(
                    namespace = %self.namespace,
                    %resource_version,
                    ?delay,
                    "Watch closed early, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    fn apply_list(&self, items: Vec<PoolInventory>) {
        let mut fresh = HashMap::with_capacity(items.len());
        for obj in items {
            match ObjectKey::from_resource(&obj) {
                Ok(key) => {
                    fresh.insert(key, Arc::new(obj));
                }
                Err(e) => warn!(error = %e, "Skipping listed object without identity"),
            }
        }

        let previous = self.store.replace(fresh.clone());

        for (key, obj) in &fresh {
            match previous.get(key) {
                Some(old) => self.notify_update(old, obj),
                None => self.notify_add(obj),
            }
        }
        for (key, old) in previous {
            if !fresh.contains_key(&key) {
                self.notify_delete(&DeletedObject::Unknown {
                    key: key.to_string(),
                    last_known: old,
                });
            }
        }
    }

    fn apply_event(&self, event: WatchEvent) {
        let key = match ObjectKey::from_resource(event.object()) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Skipping watch event without identity");
                return;
            }
        };

        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let obj = Arc::new(obj);
                match self.store.insert(key, Arc::clone(&obj)) {
                    Some(old) => self.notify_update(&old, &obj),
                    None => self.notify_add(&obj),
                }
            }
            WatchEvent::Deleted(obj) => {
                self.store.remove(&key);
                self.notify_delete(&DeletedObject::Final(Arc::new(obj)));
            }
        }
    }

    fn notify_add(&self, obj: &PoolInventory) {
        for handler in &self.handlers {
            handler.on_add(obj);
        }
    }

    fn notify_update(&self, old: &PoolInventory, new: &PoolInventory) {
        for handler in &self.handlers {
            handler.on_update(old, new);
        }
    }

    fn notify_delete(&self, obj: &DeletedObject) {
        for handler in &self.handlers {
            handler.on_delete(obj);
        }
    }
}
