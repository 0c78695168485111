//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Health state machine and probe settings.
    pub health: HealthConfig,

    /// Fallback retry settings.
    pub retries: RetryConfig,

    /// Overload backlog settings.
    pub backlog: BacklogConfig,

    /// Backend pools.
    pub pools: Vec<PoolConfig>,
}

/// One named backend pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Pool identifier for lookup, logging and metrics.
    pub name: String,

    /// Registered action that builds the pool (e.g. "balancer.rr").
    #[serde(default = "default_action")]
    pub action: String,

    /// A single target table or a list of target tables.
    /// Kept raw so pool construction can report entry-level type errors.
    #[serde(default)]
    pub targets: Option<toml::Value>,
}

fn default_action() -> String {
    "balancer.rr".to_string()
}

/// Health configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Enable active probing of Down backends.
    pub enabled: bool,

    /// Time a backend stays Down before it is probed, in seconds.
    pub probe_interval_secs: u64,

    /// Probe timeout in seconds.
    pub probe_timeout_secs: u64,

    /// Upper bound for the probe backoff, in seconds.
    pub max_probe_backoff_secs: u64,

    /// Consecutive connection-level failures before marking Down.
    pub failure_threshold: u32,

    /// Load at which a backend becomes Overloaded (0 disables).
    pub high_water: usize,

    /// Load below which an Overloaded backend is Alive again.
    pub low_water: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval_secs: 10,
            probe_timeout_secs: 2,
            max_probe_backoff_secs: 120,
            failure_threshold: 3,
            high_water: 100,
            low_water: 80,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of re-routes per request.
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

/// Backlog configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BacklogConfig {
    /// Maximum queued requests per pool (0 disables the backlog).
    pub capacity: usize,

    /// How long a request may wait, in milliseconds.
    pub deadline_ms: u64,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            deadline_ms: 5000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
