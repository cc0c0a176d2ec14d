//! `InventoryBackend` backed by the Kubernetes API server.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use kube::Client;
use kube::api::{Api, ListParams, PostParams, WatchEvent as KubeWatchEvent, WatchParams};
use kube::core::ErrorResponse;
use tracing::debug;

use super::{BackendError, InventoryBackend, InventoryList, Result, WatchEvent, WatchStream};
use crate::key::ObjectKey;
use crate::resource::PoolInventory;

/// Server-side watch timeout; the informer re-watches when it ends.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Kubernetes client for `PoolInventory` objects.
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
}

impl KubeBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<PoolInventory> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_status(status: &ErrorResponse) -> BackendError {
    let message = format!("{} ({})", status.message, status.reason);
    match (status.code, status.reason.as_str()) {
        (404, _) => BackendError::NotFound(message),
        (409, "AlreadyExists") => BackendError::AlreadyExists(message),
        (409, _) => BackendError::Conflict(message),
        (410, _) => BackendError::Expired(message),
        (400 | 422, _) => BackendError::Invalid(message),
        _ => BackendError::Transient(message),
    }
}

fn map_error(err: kube::Error) -> BackendError {
    match err {
        kube::Error::Api(status) => map_status(&status),
        other => BackendError::Transient(other.to_string()),
    }
}

#[async_trait]
impl InventoryBackend for KubeBackend {
    async fn get(&self, key: &ObjectKey) -> Result<Option<PoolInventory>> {
        self.api(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(map_error)
    }

    async fn list(&self, namespace: &str) -> Result<InventoryList> {
        let list = self
            .api(namespace)
            .list(&ListParams::default())
            .await
            .map_err(map_error)?;

        Ok(InventoryList {
            items: list.items,
            resource_version: list.metadata.resource_version.unwrap_or_default(),
        })
    }

    async fn watch(&self, namespace: &str, resource_version: &str) -> Result<WatchStream> {
        debug!(namespace, resource_version, "Starting watch");
        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = self
            .api(namespace)
            .watch(&params, resource_version)
            .await
            .map_err(map_error)?;

        let events = stream
            .map_err(map_error)
            .try_filter_map(|event| async move {
                match event {
                    KubeWatchEvent::Added(obj) => Ok(Some(WatchEvent::Added(obj))),
                    KubeWatchEvent::Modified(obj) => Ok(Some(WatchEvent::Modified(obj))),
                    KubeWatchEvent::Deleted(obj) => Ok(Some(WatchEvent::Deleted(obj))),
                    KubeWatchEvent::Bookmark(_) => Ok(None),
                    KubeWatchEvent::Error(status) => Err(map_status(&status)),
                }
            });

        Ok(events.boxed())
    }

    async fn create(&self, obj: &PoolInventory) -> Result<PoolInventory> {
        let namespace = obj.metadata.namespace.as_deref().unwrap_or_default();
        self.api(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(map_error)
    }

    async fn update(&self, obj: &PoolInventory, resource_version: &str) -> Result<PoolInventory> {
        let key = ObjectKey::from_resource(obj).map_err(|e| BackendError::Invalid(e.to_string()))?;

        let mut obj = obj.clone();
        obj.metadata.resource_version = Some(resource_version.to_string());
        self.api(&key.namespace)
            .replace(&key.name, &PostParams::default(), &obj)
            .await
            .map_err(map_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16, reason: &str) -> ErrorResponse {
        ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: reason.to_string(),
            code,
        }
    }

    #[test]
    fn test_map_status() {
        assert!(matches!(
            map_status(&status(404, "NotFound")),
            BackendError::NotFound(_)
        ));
        assert!(matches!(
            map_status(&status(409, "AlreadyExists")),
            BackendError::AlreadyExists(_)
        ));
        assert!(matches!(
            map_status(&status(409, "Conflict")),
            BackendError::Conflict(_)
        ));
        assert!(matches!(
            map_status(&status(410, "Expired")),
            BackendError::Expired(_)
        ));
        assert!(matches!(
            map_status(&status(422, "Invalid")),
            BackendError::Invalid(_)
        ));
        assert!(matches!(
            map_status(&status(503, "ServiceUnavailable")),
            BackendError::Transient(_)
        ));
    }
}
