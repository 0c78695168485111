//! Routing error types.

use thiserror::Error;

/// HTTP status the host should answer with when routing fails.
pub const SERVICE_UNAVAILABLE: u16 = 503;

/// Request-level routing failures. None of these are fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// Every backend is Down or DownRetry.
    #[error("no eligible backend")]
    NoEligibleBackend,

    /// The pool was torn down.
    #[error("pool is closed")]
    PoolClosed,

    /// A session was presented to a pool that did not create it.
    #[error("stale session: pool generation {expected}, session generation {actual}")]
    StaleSession { expected: u64, actual: u64 },

    /// No backend available and the backlog is at capacity.
    #[error("backlog full")]
    BacklogFull,
}

impl RoutingError {
    pub fn status_code(&self) -> u16 {
        SERVICE_UNAVAILABLE
    }
}

/// Why a backlogged request did not get a backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BacklogError {
    #[error("backlog deadline elapsed")]
    DeadlineElapsed,

    #[error("backlog entry cancelled")]
    Cancelled,

    #[error("pool closed while waiting in backlog")]
    PoolClosed,
}

impl BacklogError {
    pub fn status_code(&self) -> u16 {
        SERVICE_UNAVAILABLE
    }
}
