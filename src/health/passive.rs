//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Classify errors reported by fallback
//! - Track consecutive connection-level failures
//! - Trigger the Down transition on threshold breach
//!
//! # Design Decisions
//! - Only connect failures and timeouts count against a backend
//! - Resets and bad responses are retried but do not affect health
//! - A normal completion clears the failure streak

use crate::health::state::{HealthEvent, HealthThresholds, Transition};
use crate::load_balancer::Backend;

/// Kind of backend error the host reports through fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection refused or unreachable.
    ConnectFailed,
    Timeout,
    /// Connection reset mid-request.
    Reset,
    /// Backend answered with something unusable.
    BadResponse,
}

impl ErrorKind {
    pub fn is_connection_level(self) -> bool {
        matches!(self, ErrorKind::ConnectFailed | ErrorKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConnectFailed => "connect_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Reset => "reset",
            ErrorKind::BadResponse => "bad_response",
        }
    }
}

/// Record a failed attempt on `backend`.
pub fn record_failure(
    backend: &Backend,
    kind: ErrorKind,
    thresholds: &HealthThresholds,
) -> Option<Transition> {
    if !kind.is_connection_level() {
        return None;
    }

    let failures = backend.inc_failures();
    if failures >= thresholds.failure_threshold {
        backend.apply(HealthEvent::ConnectionFailure, thresholds)
    } else {
        None
    }
}

/// Record a successful completion on `backend`.
pub fn record_success(backend: &Backend) {
    backend.reset_failures();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::state::BackendState;
    use crate::load_balancer::{TargetDescriptor, TargetHandle};

    fn backend() -> Backend {
        let descriptor = TargetDescriptor::parse("a", "http://127.0.0.1:7000").unwrap();
        let handle = TargetHandle::new(descriptor);
        Backend::new(handle.acquire())
    }

    fn thresholds(failure_threshold: u32) -> HealthThresholds {
        HealthThresholds {
            failure_threshold,
            ..HealthThresholds::default()
        }
    }

    #[test]
    fn test_threshold_reached() {
        let b = backend();
        let t = thresholds(3);

        assert!(record_failure(&b, ErrorKind::ConnectFailed, &t).is_none());
        assert!(record_failure(&b, ErrorKind::Timeout, &t).is_none());
        let tr = record_failure(&b, ErrorKind::ConnectFailed, &t).unwrap();
        assert_eq!(tr.to, BackendState::Down);
    }

    #[test]
    fn test_success_resets_streak() {
        let b = backend();
        let t = thresholds(2);

        record_failure(&b, ErrorKind::ConnectFailed, &t);
        record_success(&b);
        assert_eq!(b.consecutive_failures(), 0);
        assert!(record_failure(&b, ErrorKind::ConnectFailed, &t).is_none());
        assert_eq!(b.state(), BackendState::Alive);
    }

    #[test]
    fn test_non_connection_errors_ignored() {
        let b = backend();
        let t = thresholds(1);

        assert!(record_failure(&b, ErrorKind::Reset, &t).is_none());
        assert!(record_failure(&b, ErrorKind::BadResponse, &t).is_none());
        assert_eq!(b.consecutive_failures(), 0);
        assert_eq!(b.state(), BackendState::Alive);
    }
}
