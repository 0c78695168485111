//! Round-robin load balancing strategy.

use std::sync::Mutex;
use crate::load_balancer::{Backend, Eligibility, SelectionPolicy};

/// Round-robin selector.
/// Keeps a cursor on the index after the last selection and scans forward
/// from it, skipping backends the filter rejects.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: Mutex<usize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, backends: &[Backend], filter: &Eligibility<'_>) -> Option<usize> {
        let len = backends.len();
        if len == 0 {
            return None;
        }

        let mut cursor = self.cursor.lock().expect("round-robin cursor poisoned");
        let start = *cursor % len;

        for offset in 0..len {
            let index = (start + offset) % len;
            if filter.admits(index, &backends[index]) {
                *cursor = (index + 1) % len;
                return Some(index);
            }
        }
        None
    }
}
