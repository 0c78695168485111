//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BalancerConfig (validated, immutable)
//!     → value.rs converts each pool's raw targets into Value
//!     → PoolSet builds one BackendPool per pool
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → PoolSet swaps rebuilt pools in atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod value;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BacklogConfig, BalancerConfig, HealthConfig, ObservabilityConfig, PoolConfig, RetryConfig,
};
pub use validation::ValidationError;
pub use value::Value;
