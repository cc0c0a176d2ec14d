//! Process-wide shutdown signal.
//!
//! Long-running tasks take a `watch::Receiver<bool>` that flips to `true`
//! once when the process should stop.

use tokio::sync::watch;

/// Resolve once shutdown has been requested. A dropped sender counts as a
/// request.
pub async fn requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|down| *down).await;
}
