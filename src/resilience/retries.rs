//! Retry budget for fallback.
//!
//! # Design Decisions
//! - Bounded per session so a run of failing backends cannot loop forever
//! - A retry never returns to a backend the request already failed on

use crate::config::RetryConfig;

/// How many times fallback may re-route a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Whether another retry is allowed after `used` retries.
    pub fn allows(&self, used: u32) -> bool {
        used < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_retries)
    }
}
