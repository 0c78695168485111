//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pools, health monitors, fallback:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or config)
//!     → Prometheus scrape endpoint (when enabled)
//! ```
//!
//! # Design Decisions
//! - Metric updates are no-ops until a recorder is installed, so the
//!   library can be embedded without the exporter
//! - Labels are pool and backend names, never request data

pub mod logging;
pub mod metrics;

pub use self::logging::init_tracing;
pub use self::metrics::init_metrics;
