//! Request-routing core for a load balancer.
//!
//! Pools of backend targets, selection policies, per-request routing
//! sessions with retry, health tracking and a bounded wait backlog.

pub mod config;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;

pub use config::{BalancerConfig, ConfigError, Value};
pub use health::{BackendState, ErrorKind};
pub use lifecycle::Shutdown;
pub use load_balancer::{
    ActionRegistry, Admission, BackendPool, PoolSet, RoutingError, RoutingSession,
};
pub use resilience::FallbackOutcome;
