//! Shutdown coordination for the balancer.

use std::time::Duration;
use tokio::sync::broadcast;

use crate::load_balancer::BackendPool;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Tear `pool` down and wait up to `timeout` for its sessions to finish.
///
/// Returns `true` if the pool went idle in time.
pub async fn drain(pool: &BackendPool, timeout: Duration) -> bool {
    pool.teardown();
    match tokio::time::timeout(timeout, pool.wait_idle()).await {
        Ok(()) => {
            tracing::info!(pool = %pool.name(), "Pool drained");
            true
        }
        Err(_) => {
            tracing::warn!(
                pool = %pool.name(),
                in_flight = pool.in_flight(),
                "Pool still has sessions in flight after drain timeout"
            );
            false
        }
    }
}
