//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check pools reference registered actions
//! - Validate value ranges (thresholds, intervals)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Target lists are checked at pool construction, where entry-level
//!   diagnostics are produced

use std::collections::HashSet;
use thiserror::Error;

use crate::config::schema::BalancerConfig;
use crate::load_balancer::ActionRegistry;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("pool {index} has an empty name")]
    EmptyPoolName { index: usize },

    #[error("duplicate pool name '{0}'")]
    DuplicatePool(String),

    #[error("pool '{pool}' uses unknown action '{action}'")]
    UnknownAction { pool: String, action: String },

    #[error("pool '{0}' has no targets")]
    MissingTargets(String),

    #[error("health.low_water ({low}) must be below health.high_water ({high})")]
    WaterMarks { low: usize, high: usize },

    #[error("health.low_water must be at least 1 when health.high_water is set")]
    LowWater,

    #[error("health.failure_threshold must be at least 1")]
    FailureThreshold,

    #[error("health.probe_interval_secs must be greater than 0")]
    ProbeInterval,
}

/// Check a parsed configuration.
pub fn validate_config(
    config: &BalancerConfig,
    registry: &ActionRegistry,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, pool) in config.pools.iter().enumerate() {
        if pool.name.trim().is_empty() {
            errors.push(ValidationError::EmptyPoolName { index });
        } else if !seen.insert(pool.name.as_str()) {
            errors.push(ValidationError::DuplicatePool(pool.name.clone()));
        }
        if !registry.contains(&pool.action) {
            errors.push(ValidationError::UnknownAction {
                pool: pool.name.clone(),
                action: pool.action.clone(),
            });
        }
        if pool.targets.is_none() {
            errors.push(ValidationError::MissingTargets(pool.name.clone()));
        }
    }

    let health = &config.health;
    if health.high_water > 0 && health.low_water >= health.high_water {
        errors.push(ValidationError::WaterMarks {
            low: health.low_water,
            high: health.high_water,
        });
    }
    // An Overloaded backend could never drop below a zero low-water mark
    if health.high_water > 0 && health.low_water == 0 {
        errors.push(ValidationError::LowWater);
    }
    if health.failure_threshold == 0 {
        errors.push(ValidationError::FailureThreshold);
    }
    if health.probe_interval_secs == 0 {
        errors.push(ValidationError::ProbeInterval);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
