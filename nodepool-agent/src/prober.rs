//! Discovery of the ZFS pools present on the machine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::resource::Pool;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("failed to run zpool: {0}")]
    Spawn(String),

    #[error("zpool list exited with {status}: {stderr}")]
    Command { status: String, stderr: String },

    #[error("unexpected zpool output: {0}")]
    Parse(String),
}

/// Source of the observed pool set.
#[async_trait]
pub trait PoolProber: Send + Sync {
    /// Current pools, sorted by name.
    async fn probe(&self) -> Result<Vec<Pool>, ProbeError>;
}

/// Reads pools with `zpool list`.
#[derive(Debug, Clone, Default)]
pub struct ZpoolProber {
    /// Only report these pools. Empty means every imported pool.
    pools: Vec<String>,
}

impl ZpoolProber {
    pub fn new(pools: Vec<String>) -> Self {
        Self { pools }
    }
}

#[async_trait]
impl PoolProber for ZpoolProber {
    async fn probe(&self) -> Result<Vec<Pool>, ProbeError> {
        let output = Command::new("zpool")
            .args(["list", "-Hp", "-o", "name,guid,free"])
            .args(&self.pools)
            .output()
            .await
            .map_err(|e| ProbeError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(ProbeError::Command {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let pools = parse_zpool_list(&String::from_utf8_lossy(&output.stdout))?;
        debug!(count = pools.len(), "Probed pools");
        Ok(pools)
    }
}

/// Parse `zpool list -Hp -o name,guid,free` output.
pub fn parse_zpool_list(output: &str) -> Result<Vec<Pool>, ProbeError> {
    let mut pools = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let parts: Vec<&str> = line.trim().split('\t').collect();
        let [name, guid, free] = parts.as_slice() else {
            return Err(ProbeError::Parse(line.to_string()));
        };
        if name.is_empty() || guid.is_empty() {
            return Err(ProbeError::Parse(line.to_string()));
        }
        let free: u64 = free
            .parse()
            .map_err(|_| ProbeError::Parse(line.to_string()))?;
        pools.push(Pool::new(*name, *guid, free));
    }

    pools.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(pools)
}

/// Prober returning a fixed answer that can be swapped at runtime.
#[derive(Debug)]
pub struct StaticProber {
    result: Mutex<Result<Vec<Pool>, ProbeError>>,
    calls: AtomicU64,
}

impl StaticProber {
    pub fn new(pools: Vec<Pool>) -> Self {
        Self {
            result: Mutex::new(Ok(pools)),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set(&self, result: Result<Vec<Pool>, ProbeError>) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = result;
    }

    /// Number of probes served.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PoolProber for StaticProber {
    async fn probe(&self) -> Result<Vec<Pool>, ProbeError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
