//! Convergence of the stored `PoolInventory` toward the probed pools.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::backend::{self, BackendError, InventoryBackend};
use crate::builder::{InventoryBuilder, validate_pools};
use crate::cache::Store;
use crate::error::ReconcileError;
use crate::key::{KeyError, ObjectKey};
use crate::prober::PoolProber;
use crate::resource::Pool;

/// What a successful pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    /// Create lost a race with another writer. The next pass reconciles.
    AlreadyExists,
    Updated,
    Unchanged,
}

/// Trait for key reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Bring the object behind `key` in line with observed state.
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome, ReconcileError>;
}

/// Make sure `owners` holds `desired`, matched by UID. Other entries are
/// left untouched. Returns true if the list changed.
pub fn ensure_owner(owners: &mut Vec<OwnerReference>, desired: &OwnerReference) -> bool {
    match owners.iter_mut().find(|o| o.uid == desired.uid) {
        Some(existing) if existing.controller == desired.controller => false,
        Some(existing) => {
            existing.controller = desired.controller;
            true
        }
        None => {
            owners.push(desired.clone());
            true
        }
    }
}

/// Reconciler for the node's `PoolInventory`.
pub struct InventoryReconciler {
    backend: Arc<dyn InventoryBackend>,
    prober: Arc<dyn PoolProber>,
    store: Store,
    owner: OwnerReference,
    call_timeout: Duration,
}

impl InventoryReconciler {
    pub fn new(
        backend: Arc<dyn InventoryBackend>,
        prober: Arc<dyn PoolProber>,
        store: Store,
        owner: OwnerReference,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            prober,
            store,
            owner,
            call_timeout,
        }
    }

    async fn probe(&self) -> Result<Vec<Pool>, ReconcileError> {
        match timeout(self.call_timeout, self.prober.probe()).await {
            Ok(result) => result.map_err(ReconcileError::from),
            Err(_) => Err(ReconcileError::Timeout {
                op: "probe",
                after: self.call_timeout,
            }),
        }
    }

    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = backend::Result<T>>,
    ) -> Result<T, ReconcileError> {
        match timeout(self.call_timeout, fut).await {
            Ok(result) => result.map_err(|e| ReconcileError::backend(op, e)),
            Err(_) => Err(ReconcileError::Timeout {
                op,
                after: self.call_timeout,
            }),
        }
    }

    async fn create(
        &self,
        key: &ObjectKey,
        pools: Vec<Pool>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let obj = InventoryBuilder::new(key.clone())
            .pools(pools)
            .owner(self.owner.clone())
            .build()?;

        match self.call("create", self.backend.create(&obj)).await {
            Ok(created) => {
                info!(
                    key = %key,
                    pools = obj.spec.pools.len(),
                    resource_version = created.metadata.resource_version.as_deref().unwrap_or_default(),
                    "Created inventory"
                );
                Ok(ReconcileOutcome::Created)
            }
            Err(ReconcileError::Backend {
                source: BackendError::AlreadyExists(_),
                ..
            }) => {
                debug!(key = %key, "Inventory already exists, leaving it to the next pass");
                Ok(ReconcileOutcome::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Reconciler for InventoryReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome, ReconcileError> {
        if key.namespace.is_empty() {
            return Err(KeyError::MissingNamespace.into());
        }
        if key.name.is_empty() {
            return Err(KeyError::MissingName.into());
        }

        let current = self.store.get(key);
        let observed = self.probe().await?;

        let Some(current) = current else {
            return self.create(key, observed).await;
        };

        let mut desired = (*current).clone();

        let owners = desired.metadata.owner_references.get_or_insert_with(Vec::new);
        let owner_changed = ensure_owner(owners, &self.owner);

        let pools_changed = desired.spec.pools != observed;
        if pools_changed {
            validate_pools(&observed)?;
            desired.spec.pools = observed;
        }

        if !owner_changed && !pools_changed {
            debug!(key = %key, "Inventory up to date");
            return Ok(ReconcileOutcome::Unchanged);
        }

        let resource_version = current
            .metadata
            .resource_version
            .clone()
            .unwrap_or_default();
        let updated = self
            .call("update", self.backend.update(&desired, &resource_version))
            .await?;

        info!(
            key = %key,
            owner_changed,
            pools_changed,
            resource_version = updated.metadata.resource_version.as_deref().unwrap_or_default(),
            "Updated inventory"
        );
        Ok(ReconcileOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(uid: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: "v1".to_string(),
            kind: "Node".to_string(),
            name: "node-1".to_string(),
            uid: uid.to_string(),
            controller: Some(controller),
            block_owner_deletion: None,
        }
    }

    #[test]
    fn test_ensure_owner_appends_missing() {
        let mut owners = vec![owner("other", false)];
        assert!(ensure_owner(&mut owners, &owner("uid-1", true)));
        assert_eq!(owners, vec![owner("other", false), owner("uid-1", true)]);

        assert!(!ensure_owner(&mut owners, &owner("uid-1", true)));
        assert_eq!(owners.len(), 2);
    }

    #[test]
    fn test_ensure_owner_fixes_controller_flag_in_place() {
        let mut owners = vec![owner("uid-1", false), owner("other", false)];
        assert!(ensure_owner(&mut owners, &owner("uid-1", true)));
        assert_eq!(owners, vec![owner("uid-1", true), owner("other", false)]);
    }

    #[test]
    fn test_ensure_owner_on_empty_list() {
        let mut owners = Vec::new();
        assert!(ensure_owner(&mut owners, &owner("uid-1", true)));
        assert_eq!(owners, vec![owner("uid-1", true)]);
    }
}
