//! Error types of the control loop.

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;
use crate::builder::ValidationError;
use crate::config::ConfigError;
use crate::key::KeyError;
use crate::prober::ProbeError;
use crate::scheme::SchemeError;

/// Failure of a single reconcile pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Failed to probe pools: {0}")]
    Probe(#[from] ProbeError),

    #[error("Backend {op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Backend {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Invalid object: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid key: {0}")]
    Key(#[from] KeyError),
}

impl ReconcileError {
    pub(crate) fn backend(op: &'static str, source: BackendError) -> Self {
        Self::Backend { op, source }
    }

    /// Whether requeueing the key can make the next pass succeed.
    ///
    /// Validation and key errors are structural and are dropped instead.
    /// A backend error the server will keep rejecting is dropped as well.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Probe(_) | Self::Timeout { .. } => true,
            Self::Backend { source, .. } => source.is_retryable(),
            Self::Validation(_) | Self::Key(_) => false,
        }
    }
}

/// Errors that stop [`Controller::run`](crate::Controller::run).
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to register kinds: {0}")]
    Scheme(#[from] SchemeError),

    #[error("Failed to build owner reference: {0}")]
    Owner(SchemeError),

    #[error("Cache did not sync within {0:?}")]
    CacheSyncTimeout(Duration),
}
