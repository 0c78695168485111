//! Backend health state machine.
//!
//! # States
//! - Alive: backend receives traffic
//! - Overloaded: backend still receives traffic, but load is above high-water
//! - Down: backend excluded from selection
//! - DownRetry: a probe is in flight, backend still excluded
//!
//! # State Transitions
//! ```text
//! Alive → Overloaded:          load >= high_water
//! Overloaded → Alive:          load < low_water
//! Alive/Overloaded → Down:     connection-level failure threshold reached
//! Down → DownRetry:            probe interval elapsed
//! DownRetry → Alive:           probe succeeded
//! DownRetry → Down:            probe failed
//! ```
//!
//! # Design Decisions
//! - Transitions are a pure function so they can be applied with a CAS loop
//! - Hysteresis between high_water and low_water prevents flapping
//! - No terminal state; backends cycle for the lifetime of the pool

use serde::Serialize;
use std::fmt;

use crate::config::HealthConfig;

/// Health state of a single backend.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    Alive = 0,
    Overloaded = 1,
    Down = 2,
    DownRetry = 3,
}

impl From<u8> for BackendState {
    fn from(val: u8) -> Self {
        match val {
            0 => BackendState::Alive,
            1 => BackendState::Overloaded,
            2 => BackendState::Down,
            _ => BackendState::DownRetry,
        }
    }
}

impl BackendState {
    /// Selectable by the routing policies.
    pub fn is_eligible(self) -> bool {
        matches!(self, BackendState::Alive | BackendState::Overloaded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendState::Alive => "alive",
            BackendState::Overloaded => "overloaded",
            BackendState::Down => "down",
            BackendState::DownRetry => "down_retry",
        }
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a whole pool, derived from its backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateState {
    Alive,
    Overloaded,
    Down,
}

/// Alive if any backend is Alive, else Overloaded if any is Overloaded, else Down.
pub fn aggregate<I>(states: I) -> AggregateState
where
    I: IntoIterator<Item = BackendState>,
{
    let mut overloaded = false;
    for state in states {
        match state {
            BackendState::Alive => return AggregateState::Alive,
            BackendState::Overloaded => overloaded = true,
            BackendState::Down | BackendState::DownRetry => {}
        }
    }
    if overloaded {
        AggregateState::Overloaded
    } else {
        AggregateState::Down
    }
}

/// Signals fed into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// Load counter changed to the given value.
    Load(usize),
    /// Connection-level failure threshold reached.
    ConnectionFailure,
    /// The passive probe interval for a Down backend elapsed.
    ProbeDue,
    ProbeSucceeded,
    ProbeFailed,
}

/// Thresholds that drive the load and failure transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Consecutive connection-level failures before a backend goes Down.
    pub failure_threshold: u32,
    /// Load at which an Alive backend becomes Overloaded. 0 disables.
    pub high_water: usize,
    /// Load below which an Overloaded backend becomes Alive again. At
    /// least 1 whenever `high_water` is set.
    pub low_water: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

impl From<&HealthConfig> for HealthThresholds {
    fn from(config: &HealthConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            high_water: config.high_water,
            low_water: if config.high_water > 0 {
                config.low_water.max(1)
            } else {
                config.low_water
            },
        }
    }
}

/// A state change applied to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BackendState,
    pub to: BackendState,
}

/// Compute the next state for `current` given `event`.
pub fn next_state(
    current: BackendState,
    event: HealthEvent,
    thresholds: &HealthThresholds,
) -> BackendState {
    use BackendState::*;

    match (current, event) {
        (Alive, HealthEvent::Load(load))
            if thresholds.high_water > 0 && load >= thresholds.high_water =>
        {
            Overloaded
        }
        (Overloaded, HealthEvent::Load(load)) if load < thresholds.low_water => Alive,
        (Alive | Overloaded, HealthEvent::ConnectionFailure) => Down,
        (Down, HealthEvent::ProbeDue) => DownRetry,
        (DownRetry, HealthEvent::ProbeSucceeded) => Alive,
        (DownRetry, HealthEvent::ProbeFailed) => Down,
        (state, _) => state,
    }
}
