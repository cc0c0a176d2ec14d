//! In-memory `InventoryBackend`.
//!
//! Behaves like a single API server: every write bumps a global revision
//! that becomes the object's resource version, updates are rejected when
//! the caller's version is stale, and changes fan out to watchers over a
//! broadcast channel. A bounded history lets a watch resume from an older
//! revision; anything older than the history is reported as expired.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use uuid::Uuid;

use super::{BackendError, InventoryBackend, InventoryList, Result, WatchEvent, WatchStream};
use crate::key::ObjectKey;
use crate::resource::PoolInventory;

const HISTORY_LIMIT: usize = 1024;
const WATCH_BUFFER: usize = 256;

#[derive(Debug, Clone)]
struct Change {
    revision: u64,
    event: WatchEvent,
}

impl Change {
    fn namespace(&self) -> Option<&str> {
        self.event.object().metadata.namespace.as_deref()
    }
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<ObjectKey, PoolInventory>,
    revision: u64,
    history: VecDeque<Change>,
    writes: u64,
    write_errors: VecDeque<BackendError>,
    list_errors: VecDeque<BackendError>,
}

impl MemoryState {
    fn record(&mut self, event: WatchEvent, events: &broadcast::Sender<Change>) {
        let change = Change {
            revision: self.revision,
            event,
        };
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(change.clone());
        // No receivers is fine.
        let _ = events.send(change);
    }

    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

/// In-memory object store.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<Change>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            state: Mutex::new(MemoryState::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of successful create and update calls.
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }

    /// Current revision of the store.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// Snapshot of a stored object, bypassing any error injection.
    pub fn object(&self, key: &ObjectKey) -> Option<PoolInventory> {
        self.lock().objects.get(key).cloned()
    }

    /// Fail the next create or update with `err`.
    pub fn push_write_error(&self, err: BackendError) {
        self.lock().write_errors.push_back(err);
    }

    /// Fail the next list with `err`.
    pub fn push_list_error(&self, err: BackendError) {
        self.lock().list_errors.push_back(err);
    }

    /// Delete an object, as an external actor (e.g. garbage collection) would.
    pub fn delete(&self, key: &ObjectKey) -> Result<PoolInventory> {
        let mut state = self.lock();
        let mut obj = state
            .objects
            .remove(key)
            .ok_or_else(|| BackendError::NotFound(key.to_string()))?;
        obj.metadata.resource_version = Some(state.next_revision());
        state.record(WatchEvent::Deleted(obj.clone()), &self.events);
        debug!(key = %key, "Deleted object");
        Ok(obj)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_revision(resource_version: &str) -> Result<Option<u64>> {
    if resource_version.is_empty() {
        return Ok(None);
    }
    resource_version
        .parse()
        .map(Some)
        .map_err(|_| BackendError::Expired(format!("invalid resource version {resource_version}")))
}

#[async_trait]
impl InventoryBackend for MemoryBackend {
    async fn get(&self, key: &ObjectKey) -> Result<Option<PoolInventory>> {
        Ok(self.lock().objects.get(key).cloned())
    }

    async fn list(&self, namespace: &str) -> Result<InventoryList> {
        let mut state = self.lock();
        if let Some(err) = state.list_errors.pop_front() {
            return Err(err);
        }

        let items = state
            .objects
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(_, obj)| obj.clone())
            .collect();

        Ok(InventoryList {
            items,
            resource_version: state.revision.to_string(),
        })
    }

    async fn watch(&self, namespace: &str, resource_version: &str) -> Result<WatchStream> {
        let state = self.lock();
        let since = parse_revision(resource_version)?.unwrap_or(state.revision);

        if since < state.revision {
            let oldest = state.history.front().map(|c| c.revision).unwrap_or(0);
            if since + 1 < oldest {
                return Err(BackendError::Expired(format!(
                    "revision {since} is older than {oldest}"
                )));
            }
        }

        // Subscribe while holding the lock so no change falls between the
        // replayed history and the live stream.
        let live = BroadcastStream::new(self.events.subscribe());
        let replay: Vec<Change> = state
            .history
            .iter()
            .filter(|c| c.revision > since)
            .cloned()
            .collect();
        drop(state);

        let namespace = namespace.to_string();
        let stream = futures::stream::iter(replay.into_iter().map(Ok))
            .chain(live.map(|item| {
                item.map_err(|e| BackendError::Expired(format!("watch lagged: {e}")))
            }))
            .filter_map(move |item| {
                let item = match item {
                    Ok(change) if change.revision <= since => None,
                    Ok(change) if change.namespace() != Some(namespace.as_str()) => None,
                    Ok(change) => Some(Ok(change.event)),
                    Err(e) => Some(Err(e)),
                };
                futures::future::ready(item)
            });

        Ok(stream.boxed())
    }

    async fn create(&self, obj: &PoolInventory) -> Result<PoolInventory> {
        let mut state = self.lock();
        if let Some(err) = state.write_errors.pop_front() {
            return Err(err);
        }

        let key = ObjectKey::from_resource(obj).map_err(|e| BackendError::Invalid(e.to_string()))?;
        if state.objects.contains_key(&key) {
            return Err(BackendError::AlreadyExists(key.to_string()));
        }

        let mut created = obj.clone();
        created.metadata.uid = Some(Uuid::new_v4().to_string());
        created.metadata.resource_version = Some(state.next_revision());
        state.objects.insert(key.clone(), created.clone());
        state.writes += 1;
        state.record(WatchEvent::Added(created.clone()), &self.events);

        debug!(key = %key, "Created object");
        Ok(created)
    }

    async fn update(&self, obj: &PoolInventory, resource_version: &str) -> Result<PoolInventory> {
        let mut state = self.lock();
        if let Some(err) = state.write_errors.pop_front() {
            return Err(err);
        }

        let key = ObjectKey::from_resource(obj).map_err(|e| BackendError::Invalid(e.to_string()))?;
        let current = state
            .objects
            .get(&key)
            .ok_or_else(|| BackendError::NotFound(key.to_string()))?;

        let current_version = current.metadata.resource_version.clone().unwrap_or_default();
        if current_version != resource_version {
            return Err(BackendError::Conflict(format!(
                "{key}: stored version {current_version}, update based on {resource_version}"
            )));
        }
        let uid = current.metadata.uid.clone();

        let mut updated = obj.clone();
        updated.metadata.uid = uid;
        updated.metadata.resource_version = Some(state.next_revision());
        state.objects.insert(key.clone(), updated.clone());
        state.writes += 1;
        state.record(WatchEvent::Modified(updated.clone()), &self.events);

        debug!(key = %key, "Updated object");
        Ok(updated)
    }
}
