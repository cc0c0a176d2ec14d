//! nodepool-agent: keeps a node's `PoolInventory` object in sync with the
//! ZFS pools found on the machine.
//!
//! The agent is a small control loop:
//! - an informer keeps a local cache of `PoolInventory` objects current
//! - the event router turns cache notifications into queued keys
//! - a resync timer re-queues the node's key on a fixed interval
//! - workers drain the queue and run the reconciler, which probes the pools
//!   and creates or updates the stored object

pub mod backend;
pub mod backoff;
pub mod builder;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod key;
pub mod prober;
pub mod queue;
pub mod reconciler;
pub mod resource;
pub mod resync;
pub mod router;
pub mod scheme;
pub mod shutdown;
pub mod worker;

pub use backend::{BackendError, InventoryBackend, WatchEvent};
pub use config::{Config, OwnerConfig, Scope};
pub use controller::Controller;
pub use error::{ControllerError, ReconcileError};
pub use key::ObjectKey;
pub use prober::{PoolProber, ZpoolProber};
pub use queue::WorkQueue;
pub use reconciler::{InventoryReconciler, ReconcileOutcome};
pub use resource::{Pool, PoolInventory, PoolInventorySpec};
