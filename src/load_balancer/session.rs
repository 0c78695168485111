//! Per-request routing sessions.
//!
//! A `RoutingSession` correlates one in-flight request with the backend it
//! was routed to. It is created by selection and consumed by exactly one of
//! `BackendPool::finished` or `BackendPool::fallback`. Dropping an active
//! session finalises it as a completion, so load is never leaked.

use serde::Serialize;
use std::sync::Arc;

use crate::load_balancer::{BackendPool, TargetHandle};

/// Copyable identity of a session: backend index plus pool generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionToken {
    pub backend_index: usize,
    pub generation: u64,
}

/// One in-flight request bound to a backend.
#[derive(Debug)]
pub struct RoutingSession {
    pub(crate) pool: Arc<BackendPool>,
    pub(crate) backend_index: usize,
    /// Backends this request has already failed on.
    pub(crate) tried: Vec<usize>,
    pub(crate) retries: u32,
    /// Whether this session still holds a unit of load.
    pub(crate) active: bool,
}

impl RoutingSession {
    pub(crate) fn new(pool: Arc<BackendPool>, backend_index: usize) -> Self {
        Self {
            pool,
            backend_index,
            tried: Vec::new(),
            retries: 0,
            active: true,
        }
    }

    pub fn token(&self) -> SessionToken {
        SessionToken {
            backend_index: self.backend_index,
            generation: self.pool.generation(),
        }
    }

    pub fn backend_index(&self) -> usize {
        self.backend_index
    }

    /// Target the host should forward the request to.
    pub fn target(&self) -> &TargetHandle {
        self.pool.backends()[self.backend_index].handle()
    }

    /// Retries consumed so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Finalise this session as a normal completion.
    pub fn finish(self) {
        let pool = self.pool.clone();
        // Own pool, so the ownership check cannot fail
        let _ = pool.finished(self);
    }
}

impl Drop for RoutingSession {
    fn drop(&mut self) {
        if self.active {
            self.active = false;
            tracing::debug!(
                pool = %self.pool.name(),
                backend = self.backend_index,
                "Session dropped without explicit completion"
            );
            self.pool.complete(self.backend_index);
        }
    }
}
