//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     ctrl-c → Shutdown::trigger → health monitors stop
//!            → every pool torn down → in-flight sessions drain → exit
//! ```
//!
//! # Design Decisions
//! - Draining has a deadline; sessions still open after it keep their
//!   pool's targets alive until they finish

pub mod shutdown;

pub use shutdown::{drain, Shutdown};
