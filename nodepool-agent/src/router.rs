//! Turns cache notifications into queued keys.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::cache::{DeletedObject, ResourceEventHandler};
use crate::config::Scope;
use crate::key::ObjectKey;
use crate::queue::WorkQueue;
use crate::resource::PoolInventory;

/// Enqueues the key of every in-scope object that changed. Events for other
/// objects are dropped.
pub struct EventRouter {
    scope: Scope,
    queue: Arc<WorkQueue<ObjectKey>>,
    dropped: AtomicU64,
}

impl EventRouter {
    pub fn new(scope: Scope, queue: Arc<WorkQueue<ObjectKey>>) -> Self {
        Self {
            scope,
            queue,
            dropped: AtomicU64::new(0),
        }
    }

    /// Events dropped because they were outside the scope.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn route(&self, key: ObjectKey, event: &'static str) {
        if self.scope.contains(&key) {
            debug!(key = %key, event, "Enqueueing");
            self.queue.add(key);
            return;
        }

        let previous = self.dropped.fetch_add(1, Ordering::Relaxed);
        if previous == 0 {
            warn!(
                key = %key,
                event,
                scope = %self.scope.key(),
                "Ignoring event outside the configured scope"
            );
        } else {
            debug!(key = %key, event, "Ignoring out-of-scope event");
        }
    }

    fn route_object(&self, obj: &PoolInventory, event: &'static str) {
        match ObjectKey::from_resource(obj) {
            Ok(key) => self.route(key, event),
            Err(e) => warn!(error = %e, event, "Dropping event for object without identity"),
        }
    }
}

impl ResourceEventHandler for EventRouter {
    fn on_add(&self, obj: &PoolInventory) {
        self.route_object(obj, "add");
    }

    fn on_update(&self, _old: &PoolInventory, new: &PoolInventory) {
        self.route_object(new, "update");
    }

    fn on_delete(&self, obj: &DeletedObject) {
        match obj {
            DeletedObject::Final(obj) => self.route_object(obj, "delete"),
            DeletedObject::Unknown { key, .. } => match ObjectKey::parse(key) {
                Ok(key) => self.route(key, "delete"),
                Err(e) => warn!(error = %e, "Dropping tombstone with malformed key"),
            },
        }
    }
}
