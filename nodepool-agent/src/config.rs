//! Runtime configuration of the controller.

use std::time::Duration;

use thiserror::Error;

use crate::key::ObjectKey;
use crate::queue::{DEFAULT_RATE_LIMIT_BASE, DEFAULT_RATE_LIMIT_MAX};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("scope namespace is empty")]
    EmptyNamespace,

    #[error("scope name is empty")]
    EmptyName,

    #[error("owner uid is empty")]
    EmptyOwnerUid,

    #[error("at least one worker is required")]
    NoWorkers,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("rate limit base {base:?} exceeds max {max:?}")]
    RateLimitOrder { base: Duration, max: Duration },
}

/// The single object this process is responsible for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub namespace: String,
    pub name: String,
}

impl Scope {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        key.namespace == self.namespace && key.name == self.name
    }
}

/// The `Node` that owns the inventory object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerConfig {
    pub name: String,
    pub uid: String,
    /// Value of the owner reference's `controller` flag.
    pub controller: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub scope: Scope,
    pub owner: OwnerConfig,
    pub workers: usize,
    pub resync_interval: Duration,
    pub cache_sync_timeout: Duration,
    /// Upper bound of every backend call made while reconciling.
    pub call_timeout: Duration,
    pub rate_limit_base: Duration,
    pub rate_limit_max: Duration,
}

impl Config {
    /// Config for `namespace/name`, owned by the node of the same name, with
    /// default timings.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        owner_uid: impl Into<String>,
    ) -> Self {
        let scope = Scope::new(namespace, name);
        let owner = OwnerConfig {
            name: scope.name.clone(),
            uid: owner_uid.into(),
            controller: true,
        };
        Self {
            scope,
            owner,
            workers: 1,
            resync_interval: Duration::from_secs(60),
            cache_sync_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
            rate_limit_base: DEFAULT_RATE_LIMIT_BASE,
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scope.namespace.is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        if self.scope.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.owner.uid.is_empty() {
            return Err(ConfigError::EmptyOwnerUid);
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        for (field, value) in [
            ("resync interval", self.resync_interval),
            ("cache sync timeout", self.cache_sync_timeout),
            ("call timeout", self.call_timeout),
            ("rate limit base", self.rate_limit_base),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(field));
            }
        }

        if self.rate_limit_base > self.rate_limit_max {
            return Err(ConfigError::RateLimitOrder {
                base: self.rate_limit_base,
                max: self.rate_limit_max,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::new("openebs", "node-1", "uid-1");
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.owner.name, "node-1");
        assert!(config.owner.controller);
        assert_eq!(config.scope.key(), ObjectKey::new("openebs", "node-1"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::new("", "node-1", "uid-1");
        assert_eq!(config.validate(), Err(ConfigError::EmptyNamespace));

        config = Config::new("openebs", "node-1", "");
        assert_eq!(config.validate(), Err(ConfigError::EmptyOwnerUid));

        config = Config::new("openebs", "node-1", "uid-1");
        config.workers = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoWorkers));

        config = Config::new("openebs", "node-1", "uid-1");
        config.call_timeout = Duration::ZERO;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("call timeout"))
        );

        config = Config::new("openebs", "node-1", "uid-1");
        config.rate_limit_base = Duration::from_secs(10);
        config.rate_limit_max = Duration::from_secs(1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RateLimitOrder { .. })
        ));
    }

    #[test]
    fn test_scope_contains() {
        let scope = Scope::new("openebs", "node-1");
        assert!(scope.contains(&ObjectKey::new("openebs", "node-1")));
        assert!(!scope.contains(&ObjectKey::new("openebs", "node-2")));
        assert!(!scope.contains(&ObjectKey::new("default", "node-1")));
    }
}
