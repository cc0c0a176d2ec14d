//! Process-wide kind registry.
//!
//! Maps a kind name to its group/version so owner references and other
//! type metadata are built from a single place. The global instance is
//! created lazily and the built-in kinds are registered exactly once, no
//! matter how many controllers are constructed in the same process.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use kube::core::GroupVersionKind;
use thiserror::Error;

use crate::resource::PoolInventory;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemeError {
    #[error("kind {kind} already registered as {existing}")]
    KindConflict { kind: String, existing: String },

    #[error("kind {0} is not registered")]
    UnknownKind(String),
}

/// Registry of known kinds.
pub struct Scheme {
    kinds: RwLock<HashMap<String, GroupVersionKind>>,
}

impl Scheme {
    /// Create a new empty scheme.
    pub fn new() -> Self {
        Scheme {
            kinds: RwLock::new(HashMap::new()),
        }
    }

    /// Register a statically typed resource.
    pub fn register<K: Resource<DynamicType = ()>>(&self) -> Result<(), SchemeError> {
        let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
        self.register_gvk(gvk)
    }

    /// Register a kind. Registering the same kind twice with an identical
    /// group/version is a no-op.
    pub fn register_gvk(&self, gvk: GroupVersionKind) -> Result<(), SchemeError> {
        let mut kinds = self.kinds.write().unwrap_or_else(PoisonError::into_inner);
        match kinds.get(&gvk.kind) {
            Some(existing) if *existing == gvk => Ok(()),
            Some(existing) => Err(SchemeError::KindConflict {
                kind: gvk.kind.clone(),
                existing: existing.api_version(),
            }),
            None => {
                kinds.insert(gvk.kind.clone(), gvk);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, kind: &str) -> Option<GroupVersionKind> {
        self.kinds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.kinds.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build an owner reference pointing at an object of a registered kind.
    pub fn owner_reference(
        &self,
        kind: &str,
        name: &str,
        uid: &str,
        controller: bool,
    ) -> Result<OwnerReference, SchemeError> {
        let gvk = self
            .lookup(kind)
            .ok_or_else(|| SchemeError::UnknownKind(kind.to_string()))?;

        Ok(OwnerReference {
            api_version: gvk.api_version(),
            kind: gvk.kind,
            name: name.to_string(),
            uid: uid.to_string(),
            controller: Some(controller),
            block_owner_deletion: None,
        })
    }
}

impl Default for Scheme {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide scheme.
pub fn global() -> &'static Scheme {
    static SCHEME: OnceLock<Scheme> = OnceLock::new();
    SCHEME.get_or_init(Scheme::new)
}

/// Register the kinds used by the agent in the global scheme. Runs once.
pub fn add_to_scheme() -> Result<(), SchemeError> {
    static INIT: OnceLock<Result<(), SchemeError>> = OnceLock::new();
    INIT.get_or_init(|| {
        let scheme = global();
        scheme.register::<Node>()?;
        scheme.register::<PoolInventory>()
    })
    .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let scheme = Scheme::new();
        assert!(scheme.is_empty());

        scheme.register::<PoolInventory>().unwrap();
        scheme.register::<PoolInventory>().unwrap();
        assert_eq!(scheme.len(), 1);

        let gvk = scheme.lookup("PoolInventory").unwrap();
        assert_eq!(gvk.api_version(), "nodepool.mvirt.io/v1");
    }

    #[test]
    fn test_register_conflict() {
        let scheme = Scheme::new();
        scheme.register::<Node>().unwrap();

        let result = scheme.register_gvk(GroupVersionKind::gvk("example.io", "v2", "Node"));
        assert!(matches!(result, Err(SchemeError::KindConflict { .. })));
        assert_eq!(scheme.lookup("Node").unwrap().api_version(), "v1");
    }

    #[test]
    fn test_owner_reference() {
        let scheme = Scheme::new();
        scheme.register::<Node>().unwrap();

        let owner = scheme
            .owner_reference("Node", "node-1", "uid-1", true)
            .unwrap();
        assert_eq!(owner.api_version, "v1");
        assert_eq!(owner.kind, "Node");
        assert_eq!(owner.name, "node-1");
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.controller, Some(true));

        assert_eq!(
            scheme.owner_reference("Pod", "p", "u", false),
            Err(SchemeError::UnknownKind("Pod".to_string()))
        );
    }

    #[test]
    fn test_add_to_scheme_concurrently() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(add_to_scheme))
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert!(global().lookup("Node").is_some());
        assert!(global().lookup("PoolInventory").is_some());
    }
}
