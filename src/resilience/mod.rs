//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Backend error reported by the host:
//!     → fallback.rs (release load, feed passive health)
//!     → retries.rs (budget left?)
//!     → policy re-selects excluding tried backends → retry, else fail (503)
//!
//! Backend stays down:
//!     → backoff.rs (spacing between probes, with jitter)
//! ```
//!
//! # Design Decisions
//! - Backend errors never propagate as process errors; they degrade routing
//! - Retry budget is per request, not global
//! - Jittered backoff prevents probe storms

pub mod backoff;
pub mod fallback;
pub mod retries;

pub use fallback::FallbackOutcome;
pub use retries::RetryPolicy;
