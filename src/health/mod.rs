//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Load signals (pool.rs):
//!     load incremented/decremented
//!     → state.rs: Alive ←→ Overloaded (high/low water)
//!
//! Passive health checks (passive.rs):
//!     fallback reports an error
//!     → count connection-level failures
//!     → state.rs: Alive/Overloaded → Down once threshold reached
//!
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Down backend whose probe is due → DownRetry
//!     → Prober → Alive (success) or Down with backoff (failure)
//! ```
//!
//! # Design Decisions
//! - Health state is per-backend, aggregate state is derived per pool
//! - The probe mechanism is pluggable; the core only consumes its verdict
//! - State changes are logged and exported as metrics

pub mod active;
pub mod passive;
pub mod state;

pub use active::{HealthMonitor, Prober, TcpProber};
pub use passive::ErrorKind;
pub use state::{AggregateState, BackendState, HealthThresholds};
