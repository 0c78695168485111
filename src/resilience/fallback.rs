//! Fallback after a backend error.
//!
//! # Responsibilities
//! - Release the failed attempt's load exactly once
//! - Report the error to passive health checking
//! - Re-route to an untried eligible backend while the retry budget lasts
//! - With a backlog, wait there when the untried backends are only
//!   Overloaded
//! - Otherwise fail the request (503)

use std::sync::Arc;
use tokio::time::Instant;

use crate::health::{BackendState, ErrorKind};
use crate::load_balancer::error::SERVICE_UNAVAILABLE;
use crate::load_balancer::{BacklogTicket, BackendPool, Eligibility, RoutingError, RoutingSession};
use crate::observability::metrics;

/// What the host should do after reporting a backend error.
#[derive(Debug)]
pub enum FallbackOutcome {
    /// Send the request again, to the backend the session is now bound to.
    Retry(RoutingSession),
    /// Parked in the backlog; the ticket yields the next session. The
    /// failed session is already finalised.
    Queued(BacklogTicket),
    /// Give up; the session is already finalised.
    Fail,
}

impl FallbackOutcome {
    pub fn is_retry(&self) -> bool {
        matches!(self, FallbackOutcome::Retry(_))
    }

    /// Status to answer with when the host generates the response itself.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FallbackOutcome::Retry(_) | FallbackOutcome::Queued(_) => None,
            FallbackOutcome::Fail => Some(SERVICE_UNAVAILABLE),
        }
    }
}

impl BackendPool {
    /// Handle a failure of the backend `session` is bound to.
    pub fn fallback(
        self: &Arc<Self>,
        mut session: RoutingSession,
        error: ErrorKind,
    ) -> Result<FallbackOutcome, RoutingError> {
        self.check_owner(&session)?;

        let failed = session.backend_index;
        session.active = false;
        self.report_error(failed, error);
        self.release_load(failed);
        session.tried.push(failed);

        if self.is_closed() {
            return Ok(self.fail(failed, error, session.retries, "pool closed"));
        }
        if !self.settings().retry.allows(session.retries) {
            return Ok(self.fail(failed, error, session.retries, "retry budget exhausted"));
        }

        let queueing = self.backlog().enabled();
        let mut filter = Eligibility::excluding(&session.tried);
        if queueing {
            filter = filter.restrict_to_alive();
        }

        match self.policy().select(self.backends(), &filter) {
            Some(next) => {
                self.acquire_load(next);
                session.backend_index = next;
                session.retries += 1;
                session.active = true;

                metrics::record_fallback(self.name(), "retry");
                tracing::info!(
                    pool = %self.name(),
                    failed,
                    backend = next,
                    error = error.as_str(),
                    retry = session.retries,
                    "Retrying request on another backend"
                );
                Ok(FallbackOutcome::Retry(session))
            }
            None if queueing && self.has_overloaded(&session.tried) => {
                let deadline = Instant::now() + self.settings().backlog_deadline;
                match self.enqueue(deadline) {
                    Ok(ticket) => {
                        self.leave();
                        metrics::record_fallback(self.name(), "queued");
                        tracing::info!(
                            pool = %self.name(),
                            failed,
                            error = error.as_str(),
                            retries = session.retries,
                            "Request queued after backend error"
                        );
                        Ok(FallbackOutcome::Queued(ticket))
                    }
                    Err(_) => Ok(self.fail(failed, error, session.retries, "backlog full")),
                }
            }
            None => Ok(self.fail(failed, error, session.retries, "no alternative backend")),
        }
    }

    fn has_overloaded(&self, tried: &[usize]) -> bool {
        self.backends()
            .iter()
            .enumerate()
            .any(|(index, b)| !tried.contains(&index) && b.state() == BackendState::Overloaded)
    }

    fn fail(&self, failed: usize, error: ErrorKind, retries: u32, reason: &str) -> FallbackOutcome {
        self.leave();
        metrics::record_fallback(self.name(), "fail");
        tracing::warn!(
            pool = %self.name(),
            backend = failed,
            error = error.as_str(),
            retries,
            reason,
            "Request failed"
        );
        FallbackOutcome::Fail
    }
}
