//! The `PoolInventory` custom resource.
//!
//! One object exists per node. Its spec lists the ZFS pools found on that
//! node; the node itself is linked through an owner reference.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired contents of a `PoolInventory` object.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "nodepool.mvirt.io",
    version = "v1",
    kind = "PoolInventory",
    plural = "poolinventories",
    shortname = "pinv",
    derive = "PartialEq",
    namespaced
)]
pub struct PoolInventorySpec {
    /// Pools reported by the node, ordered by name.
    #[serde(default)]
    pub pools: Vec<Pool>,
}

/// A single ZFS pool as reported by `zpool list`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Pool {
    pub name: String,
    /// Pool GUID.
    pub uuid: String,
    /// Free capacity as a binary-SI quantity, e.g. `100Gi`.
    #[schemars(with = "String")]
    pub free: Quantity,
}

impl Pool {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>, free_bytes: u64) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
            free: Quantity(format_binary_si(free_bytes)),
        }
    }
}

const BINARY_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

/// Render a byte count the way Kubernetes renders a binary-SI quantity:
/// the largest unit that divides the value exactly, or plain bytes.
pub fn format_binary_si(bytes: u64) -> String {
    if bytes == 0 {
        return "0".to_string();
    }

    let mut value = bytes;
    let mut suffix = "";
    for candidate in BINARY_SUFFIXES {
        if value % 1024 != 0 {
            break;
        }
        value /= 1024;
        suffix = candidate;
    }

    format!("{}{}", value, suffix)
}
