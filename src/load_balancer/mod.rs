//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Host request enters
//!     → pool.rs select (policy picks an eligible backend index)
//!         - round_robin.rs (rotate through eligible backends)
//!         - least_conn.rs (pick backend with lowest load)
//!     → session.rs (RoutingSession bound to the index, load incremented)
//!     → host proxies to the backend's target
//!     → finished: load decremented, session finalised
//!     → fallback (resilience/fallback.rs): retry elsewhere or fail
//!
//! No eligible backend but pool Overloaded:
//!     → backlog.rs (bounded FIFO, drained when load drops)
//! ```
//!
//! # Design Decisions
//! - Backend set is fixed after construction; index is the routing identity
//! - Policies are stateless apart from their cursor; the pool tracks load
//! - Down and DownRetry backends are never selected
//! - Sessions finalise exactly once, enforced by ownership

use std::fmt;

pub mod backend;
pub mod backlog;
pub mod error;
pub mod least_conn;
pub mod pool;
pub mod registry;
pub mod round_robin;
pub mod session;

pub use backend::{Backend, TargetDescriptor, TargetHandle};
pub use backlog::{Admission, BacklogTicket};
pub use error::{BacklogError, RoutingError};
pub use least_conn::LeastLoaded;
pub use pool::{BackendPool, BackendSnapshot, PoolSettings, PoolSnapshot};
pub use registry::{ActionRegistry, PoolSet, ReloadSummary};
pub use round_robin::RoundRobin;
pub use session::{RoutingSession, SessionToken};

/// Algorithm that picks one backend index out of a pool.
pub trait SelectionPolicy: Send + Sync + fmt::Debug {
    /// Name used in logs and snapshots.
    fn name(&self) -> &'static str;

    /// Pick an index admitted by `filter`, or `None` if nothing qualifies.
    fn select(&self, backends: &[Backend], filter: &Eligibility<'_>) -> Option<usize>;
}

/// Which backends a selection may return.
#[derive(Debug, Clone, Copy, Default)]
pub struct Eligibility<'a> {
    exclude: &'a [usize],
    alive_only: bool,
}

impl<'a> Eligibility<'a> {
    /// Alive and Overloaded backends.
    pub fn any() -> Self {
        Self::default()
    }

    /// Alive backends only; used while a backlog can absorb the request.
    pub fn alive_only() -> Self {
        Self {
            exclude: &[],
            alive_only: true,
        }
    }

    /// Eligible backends other than the ones already tried.
    pub fn excluding(tried: &'a [usize]) -> Self {
        Self {
            exclude: tried,
            alive_only: false,
        }
    }

    /// Narrow this filter to Alive backends.
    pub fn restrict_to_alive(mut self) -> Self {
        self.alive_only = true;
        self
    }

    pub fn admits(&self, index: usize, backend: &Backend) -> bool {
        if self.exclude.contains(&index) {
            return false;
        }
        let state = backend.state();
        if self.alive_only {
            state == crate::health::state::BackendState::Alive
        } else {
            state.is_eligible()
        }
    }
}
