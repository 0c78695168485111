//! Least-loaded load balancing strategy.

use crate::load_balancer::{Backend, Eligibility, SelectionPolicy};

/// Least-loaded selector.
/// Selects the admitted backend with the lowest in-flight load.
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl LeastLoaded {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionPolicy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn select(&self, backends: &[Backend], filter: &Eligibility<'_>) -> Option<usize> {
        // In case of tie, the lowest index is selected (stability)
        backends
            .iter()
            .enumerate()
            .filter(|(index, backend)| filter.admits(*index, backend))
            .min_by_key(|(_, backend)| backend.load())
            .map(|(index, _)| index)
    }
}
