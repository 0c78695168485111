//! Exponential backoff with jitter, used to space out probes of a backend
//! that keeps failing them.

use std::time::Duration;
use rand::Rng;

/// Delay before the next attempt after `attempt` consecutive failures.
///
/// `base_ms * 2^(attempt-1)`, capped at `max_ms`, plus up to 10% jitter so
/// probes of many backends do not line up.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}
