//! Object store abstraction for `PoolInventory` objects.
//!
//! The reconciler and the informer only talk to the store through
//! [`InventoryBackend`], so the production Kubernetes client and the
//! in-memory store used in tests are interchangeable.

pub mod kubernetes;
pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::key::ObjectKey;
use crate::resource::PoolInventory;

/// Errors that can occur during backend operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Object not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Object already exists (create raced with another writer).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Object rejected by the server.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Version mismatch (optimistic concurrency control).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The watch resource version is too old, a relist is required.
    #[error("resource version expired: {0}")]
    Expired(String),

    /// Network or server-side failure.
    #[error("transient: {0}")]
    Transient(String),
}

impl BackendError {
    /// Whether the operation may succeed when retried later.
    ///
    /// `NotFound` on a write means the object went away after it was read
    /// from the cache; the next pass recreates it.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BackendError::Invalid(_))
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// A change delivered by [`InventoryBackend::watch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(PoolInventory),
    Modified(PoolInventory),
    Deleted(PoolInventory),
}

impl WatchEvent {
    pub fn object(&self) -> &PoolInventory {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }
}

/// Snapshot returned by [`InventoryBackend::list`].
#[derive(Debug, Clone, Default)]
pub struct InventoryList {
    pub items: Vec<PoolInventory>,
    /// Version to start a watch from.
    pub resource_version: String,
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// Store operations needed by the agent.
#[async_trait]
pub trait InventoryBackend: Send + Sync {
    /// Get an object by key. A missing object is `Ok(None)`.
    async fn get(&self, key: &ObjectKey) -> Result<Option<PoolInventory>>;

    /// List every object in a namespace.
    async fn list(&self, namespace: &str) -> Result<InventoryList>;

    /// Stream changes in a namespace after `resource_version`.
    async fn watch(&self, namespace: &str, resource_version: &str) -> Result<WatchStream>;

    /// Create an object. Fails with `AlreadyExists` if the key is taken.
    async fn create(&self, obj: &PoolInventory) -> Result<PoolInventory>;

    /// Replace an object, provided it is still at `resource_version`.
    async fn update(&self, obj: &PoolInventory, resource_version: &str) -> Result<PoolInventory>;
}
