//! Identity keys for queued objects.

use std::fmt;

use thiserror::Error;

use crate::resource::PoolInventory;

/// Errors produced when deriving or parsing an [`ObjectKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("malformed key '{0}', expected namespace/name")]
    Malformed(String),

    #[error("object has no namespace")]
    MissingNamespace,

    #[error("object has no name")]
    MissingName,
}

/// `(namespace, name)` pair addressing one `PoolInventory` object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Derive the key of a stored object.
    pub fn from_resource(obj: &PoolInventory) -> Result<Self, KeyError> {
        let namespace = obj.metadata.namespace.clone().filter(|ns| !ns.is_empty());
        let name = obj.metadata.name.clone().filter(|n| !n.is_empty());

        match (namespace, name) {
            (None, _) => Err(KeyError::MissingNamespace),
            (_, None) => Err(KeyError::MissingName),
            (Some(namespace), Some(name)) => Ok(Self { namespace, name }),
        }
    }

    /// Parse a `namespace/name` string.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
                Ok(Self::new(ns, name))
            }
            _ => Err(KeyError::Malformed(s.to_string())),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::PoolInventorySpec;

    #[test]
    fn test_parse_and_display() {
        let key = ObjectKey::parse("openebs/node-1").unwrap();
        assert_eq!(key, ObjectKey::new("openebs", "node-1"));
        assert_eq!(key.to_string(), "openebs/node-1");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "node-1", "/node-1", "openebs/", "a/b/c"] {
            assert_eq!(
                ObjectKey::parse(bad),
                Err(KeyError::Malformed(bad.to_string())),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_from_resource() {
        let mut obj = PoolInventory::new("node-1", PoolInventorySpec::default());
        assert_eq!(
            ObjectKey::from_resource(&obj),
            Err(KeyError::MissingNamespace)
        );

        obj.metadata.namespace = Some("openebs".to_string());
        assert_eq!(
            ObjectKey::from_resource(&obj),
            Ok(ObjectKey::new("openebs", "node-1"))
        );

        obj.metadata.name = Some(String::new());
        assert_eq!(ObjectKey::from_resource(&obj), Err(KeyError::MissingName));
    }
}
