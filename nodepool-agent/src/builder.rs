//! Construction and validation of `PoolInventory` objects.

use std::collections::HashSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use thiserror::Error;

use crate::key::ObjectKey;
use crate::resource::{Pool, PoolInventory, PoolInventorySpec};

/// Validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Namespace is required")]
    NamespaceRequired,

    #[error("Name is required")]
    NameRequired,

    #[error("Pool name is required")]
    PoolNameRequired,

    #[error("Pool {0} is listed more than once")]
    DuplicatePool(String),

    #[error("Owner reference UID is required")]
    OwnerUidRequired,
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Check that every pool has a name and that names are unique.
pub fn validate_pools(pools: &[Pool]) -> Result<()> {
    let mut seen = HashSet::new();
    for pool in pools {
        if pool.name.is_empty() {
            return Err(ValidationError::PoolNameRequired);
        }
        if !seen.insert(pool.name.as_str()) {
            return Err(ValidationError::DuplicatePool(pool.name.clone()));
        }
    }
    Ok(())
}

/// Builder for creating a new `PoolInventory`.
pub struct InventoryBuilder {
    key: ObjectKey,
    pools: Vec<Pool>,
    owners: Vec<OwnerReference>,
}

impl InventoryBuilder {
    pub fn new(key: ObjectKey) -> Self {
        Self {
            key,
            pools: Vec::new(),
            owners: Vec::new(),
        }
    }

    pub fn pools(mut self, pools: Vec<Pool>) -> Self {
        self.pools = pools;
        self
    }

    pub fn owner(mut self, owner: OwnerReference) -> Self {
        self.owners.push(owner);
        self
    }

    pub fn build(self) -> Result<PoolInventory> {
        if self.key.namespace.is_empty() {
            return Err(ValidationError::NamespaceRequired);
        }
        if self.key.name.is_empty() {
            return Err(ValidationError::NameRequired);
        }
        if self.owners.iter().any(|o| o.uid.is_empty()) {
            return Err(ValidationError::OwnerUidRequired);
        }
        validate_pools(&self.pools)?;

        Ok(PoolInventory {
            metadata: ObjectMeta {
                name: Some(self.key.name),
                namespace: Some(self.key.namespace),
                owner_references: (!self.owners.is_empty()).then_some(self.owners),
                ..Default::default()
            },
            spec: PoolInventorySpec { pools: self.pools },
        })
    }
}
