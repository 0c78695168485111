//! Backend pool management.
//!
//! # Responsibilities
//! - Build the fixed backend set from a config value, acquiring each target
//! - Apply the selection policy and keep per-backend load
//! - Finalise sessions and feed health signals to backends
//! - Close the pool and release targets once no session is in flight

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::{BalancerConfig, ConfigError, Value};
use crate::health::passive::{self, ErrorKind};
use crate::health::state::{
    aggregate, AggregateState, BackendState, HealthEvent, HealthThresholds, Transition,
};
use crate::load_balancer::backlog::{Admission, Backlog, BacklogTicket};
use crate::load_balancer::{
    Backend, BacklogError, Eligibility, RoutingError, RoutingSession, SelectionPolicy,
    SessionToken, TargetHandle,
};
use crate::observability::metrics;
use crate::resilience::retries::RetryPolicy;

/// Runtime settings shared by every pool built from one config.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub thresholds: HealthThresholds,
    pub retry: RetryPolicy,
    /// Backlog capacity, 0 disables the backlog.
    pub backlog_capacity: usize,
    /// How long a request may wait in the backlog by default.
    pub backlog_deadline: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&BalancerConfig::default())
    }
}

impl From<&BalancerConfig> for PoolSettings {
    fn from(config: &BalancerConfig) -> Self {
        Self {
            thresholds: HealthThresholds::from(&config.health),
            retry: RetryPolicy::from(&config.retries),
            backlog_capacity: config.backlog.capacity,
            backlog_deadline: Duration::from_millis(config.backlog.deadline_ms),
        }
    }
}

/// Point-in-time view of a backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub index: usize,
    pub name: String,
    pub address: String,
    pub load: usize,
    pub state: BackendState,
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub name: String,
    pub generation: u64,
    pub policy: &'static str,
    pub state: AggregateState,
    pub closed: bool,
    pub in_flight: usize,
    pub backlog_depth: usize,
    pub backends: Vec<BackendSnapshot>,
}

/// Targets acquired so far while building a pool. Released on drop unless
/// turned into backends, so a failed build leaks nothing.
#[derive(Default)]
struct AcquiredTargets {
    handles: Vec<TargetHandle>,
}

impl AcquiredTargets {
    fn push(&mut self, handle: &TargetHandle) {
        self.handles.push(handle.acquire());
    }

    fn into_backends(mut self) -> Vec<Backend> {
        std::mem::take(&mut self.handles)
            .into_iter()
            .map(Backend::new)
            .collect()
    }
}

impl Drop for AcquiredTargets {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.release();
        }
    }
}

fn fill_backends(acquired: &mut AcquiredTargets, value: &Value) -> Result<(), ConfigError> {
    match value {
        Value::Target(handle) => {
            acquired.push(handle);
            Ok(())
        }
        Value::List(items) => {
            if items.is_empty() {
                return Err(ConfigError::EmptyList);
            }
            for (index, item) in items.iter().enumerate() {
                match item {
                    Value::Target(handle) => acquired.push(handle),
                    other => {
                        return Err(ConfigError::ExpectedAction {
                            index,
                            got: other.type_name(),
                        })
                    }
                }
            }
            Ok(())
        }
        other => Err(ConfigError::ExpectedList {
            got: other.type_name(),
        }),
    }
}

/// An ordered, fixed set of backends plus the policy that routes over it.
#[derive(Debug)]
pub struct BackendPool {
    name: String,
    generation: u64,
    backends: Vec<Backend>,
    policy: Box<dyn SelectionPolicy>,
    settings: PoolSettings,
    backlog: Backlog,
    /// Sessions created and not yet finalised.
    in_flight: AtomicUsize,
    closed: AtomicBool,
    released: AtomicBool,
    idle: Notify,
}

impl BackendPool {
    /// Build a pool from a single target or a non-empty list of targets.
    pub fn build(
        name: impl Into<String>,
        generation: u64,
        value: Option<&Value>,
        policy: Box<dyn SelectionPolicy>,
        settings: PoolSettings,
    ) -> Result<Arc<Self>, ConfigError> {
        let name = name.into();
        let value = value.ok_or(ConfigError::MissingParameter)?;

        let mut acquired = AcquiredTargets::default();
        fill_backends(&mut acquired, value)?;
        let backends = acquired.into_backends();

        tracing::info!(
            pool = %name,
            generation,
            backends = backends.len(),
            policy = policy.name(),
            "Backend pool built"
        );
        for backend in &backends {
            metrics::record_backend_state(&name, backend.name(), backend.state());
            metrics::record_backend_load(&name, backend.name(), 0);
        }

        Ok(Arc::new(Self {
            backlog: Backlog::new(settings.backlog_capacity),
            name,
            generation,
            backends,
            policy,
            settings,
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            released: AtomicBool::new(false),
            idle: Notify::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// True once teardown has released every target.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Sum of the load counters of all backends.
    pub fn total_load(&self) -> usize {
        self.backends.iter().map(Backend::load).sum()
    }

    pub fn backlog_depth(&self) -> usize {
        self.backlog.depth()
    }

    pub fn aggregate_state(&self) -> AggregateState {
        aggregate(self.backends.iter().map(Backend::state))
    }

    /// Whether `token` was issued by this pool.
    pub fn owns(&self, token: &SessionToken) -> bool {
        token.generation == self.generation && token.backend_index < self.backends.len()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            name: self.name.clone(),
            generation: self.generation,
            policy: self.policy.name(),
            state: self.aggregate_state(),
            closed: self.is_closed(),
            in_flight: self.in_flight(),
            backlog_depth: self.backlog.depth(),
            backends: self
                .backends
                .iter()
                .enumerate()
                .map(|(index, b)| BackendSnapshot {
                    index,
                    name: b.name().to_string(),
                    address: b.handle().address().to_string(),
                    load: b.load(),
                    state: b.state(),
                })
                .collect(),
        }
    }

    /// Route a request to an eligible backend.
    pub fn select(self: &Arc<Self>) -> Result<RoutingSession, RoutingError> {
        let result = self.route(&Eligibility::any());
        match &result {
            Ok(session) => {
                metrics::record_selection(&self.name, "routed");
                tracing::debug!(
                    pool = %self.name,
                    backend = session.backend_index,
                    load = self.backends[session.backend_index].load(),
                    "Backend selected"
                );
            }
            Err(e) => {
                metrics::record_selection(&self.name, outcome_label(e));
                tracing::debug!(pool = %self.name, error = %e, "Selection failed");
            }
        }
        result
    }

    /// Route a request, or park it in the backlog when every backend that
    /// could take it is overloaded. Waits at most the configured deadline.
    pub fn select_or_enqueue(self: &Arc<Self>) -> Result<Admission, RoutingError> {
        self.select_or_enqueue_until(Instant::now() + self.settings.backlog_deadline)
    }

    pub fn select_or_enqueue_until(
        self: &Arc<Self>,
        deadline: Instant,
    ) -> Result<Admission, RoutingError> {
        if !self.backlog.enabled() {
            return self.select().map(Admission::Routed);
        }

        match self.route(&Eligibility::alive_only()) {
            Ok(session) => {
                metrics::record_selection(&self.name, "routed");
                return Ok(Admission::Routed(session));
            }
            Err(RoutingError::NoEligibleBackend) => {}
            Err(e) => {
                metrics::record_selection(&self.name, outcome_label(&e));
                return Err(e);
            }
        }

        if self.aggregate_state() == AggregateState::Down {
            metrics::record_selection(&self.name, "no_eligible_backend");
            return Err(RoutingError::NoEligibleBackend);
        }

        self.enqueue(deadline).map(Admission::Queued)
    }

    /// Park a request in the backlog until an Alive backend frees up.
    pub(crate) fn enqueue(
        self: &Arc<Self>,
        deadline: Instant,
    ) -> Result<BacklogTicket, RoutingError> {
        let (waiter, rx) = match self.backlog.enqueue(deadline) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    pool = %self.name,
                    depth = self.backlog.depth(),
                    error = %e,
                    "Request rejected by backlog"
                );
                metrics::record_selection(&self.name, outcome_label(&e));
                return Err(e);
            }
        };
        metrics::record_selection(&self.name, "queued");
        metrics::record_backlog_depth(&self.name, self.backlog.depth());
        tracing::debug!(
            pool = %self.name,
            depth = self.backlog.depth(),
            "Request queued in backlog"
        );

        let ticket = BacklogTicket::new(self.clone(), waiter, rx);
        // Load may have dropped between the failed selection and the enqueue
        self.drain_backlog();
        Ok(ticket)
    }

    /// Finalise a session after a normal completion.
    pub fn finished(self: &Arc<Self>, mut session: RoutingSession) -> Result<(), RoutingError> {
        self.check_owner(&session)?;
        session.active = false;
        let index = session.backend_index;
        passive::record_success(&self.backends[index]);
        self.complete(index);
        Ok(())
    }

    /// Move a Down backend to DownRetry ahead of a probe.
    pub fn begin_probe(&self, index: usize) -> Option<Transition> {
        let transition =
            self.backends[index].apply(HealthEvent::ProbeDue, &self.settings.thresholds);
        if let Some(t) = transition {
            self.log_transition(index, t, "probe due");
        }
        transition
    }

    /// Feed a probe result for a backend in DownRetry.
    pub fn report_probe(self: &Arc<Self>, index: usize, success: bool) -> Option<Transition> {
        let backend = &self.backends[index];
        let event = if success {
            HealthEvent::ProbeSucceeded
        } else {
            HealthEvent::ProbeFailed
        };

        let transition = backend.apply(event, &self.settings.thresholds);
        if let Some(t) = transition {
            self.log_transition(index, t, if success { "probe succeeded" } else { "probe failed" });
            if t.to == BackendState::Alive {
                backend.reset_failures();
                self.observe_load(index, backend.load());
                self.drain_backlog();
            }
        }
        transition
    }

    /// Close the pool. Targets are released now if nothing is in flight,
    /// otherwise when the last session finalises. Idempotent.
    pub fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        for waiter in self.backlog.close() {
            if waiter.cancel() {
                waiter.deliver(Err(BacklogError::PoolClosed));
            }
        }
        metrics::record_backlog_depth(&self.name, 0);

        let in_flight = self.in_flight();
        tracing::info!(
            pool = %self.name,
            generation = self.generation,
            in_flight,
            "Backend pool closed"
        );
        if in_flight == 0 {
            self.release_handles();
        }
    }

    /// Resolve once no session is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    // --- Internal bookkeeping ---

    pub(crate) fn policy(&self) -> &dyn SelectionPolicy {
        self.policy.as_ref()
    }

    pub(crate) fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    fn route(self: &Arc<Self>, filter: &Eligibility<'_>) -> Result<RoutingSession, RoutingError> {
        if !self.enter() {
            return Err(RoutingError::PoolClosed);
        }
        match self.policy.select(&self.backends, filter) {
            Some(index) => {
                self.acquire_load(index);
                Ok(RoutingSession::new(self.clone(), index))
            }
            None => {
                self.leave();
                Err(RoutingError::NoEligibleBackend)
            }
        }
    }

    /// Create a session on `index` for a backlog hand-off.
    fn bind(self: &Arc<Self>, index: usize) -> RoutingSession {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.acquire_load(index);
        RoutingSession::new(self.clone(), index)
    }

    fn enter(&self) -> bool {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            self.leave();
            return false;
        }
        true
    }

    pub(crate) fn leave(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.idle.notify_waiters();
            if self.is_closed() {
                self.release_handles();
            }
        }
    }

    pub(crate) fn check_owner(&self, session: &RoutingSession) -> Result<(), RoutingError> {
        if std::ptr::eq(Arc::as_ptr(&session.pool), self) {
            return Ok(());
        }
        tracing::warn!(
            pool = %self.name,
            generation = self.generation,
            session_generation = session.pool.generation(),
            "Session presented to a pool that did not create it"
        );
        Err(RoutingError::StaleSession {
            expected: self.generation,
            actual: session.pool.generation(),
        })
    }

    pub(crate) fn acquire_load(&self, index: usize) {
        let load = self.backends[index].inc_load();
        self.observe_load(index, load);
    }

    pub(crate) fn release_load(self: &Arc<Self>, index: usize) {
        let load = self.backends[index].dec_load();
        self.observe_load(index, load);
        self.drain_backlog();
    }

    /// Release one unit of load and the in-flight slot of a session.
    pub(crate) fn complete(self: &Arc<Self>, index: usize) {
        self.release_load(index);
        self.leave();
    }

    pub(crate) fn report_error(&self, index: usize, kind: ErrorKind) -> Option<Transition> {
        let transition =
            passive::record_failure(&self.backends[index], kind, &self.settings.thresholds);
        if let Some(t) = transition {
            self.log_transition(index, t, kind.as_str());
        }
        transition
    }

    fn observe_load(&self, index: usize, load: usize) {
        let backend = &self.backends[index];
        metrics::record_backend_load(&self.name, backend.name(), load);
        if let Some(t) = backend.apply(HealthEvent::Load(load), &self.settings.thresholds) {
            self.log_transition(index, t, "load");
        }
    }

    fn log_transition(&self, index: usize, transition: Transition, reason: &str) {
        let backend = &self.backends[index];
        tracing::info!(
            pool = %self.name,
            backend = index,
            target = %backend.name(),
            from = %transition.from,
            to = %transition.to,
            reason,
            "Backend state changed"
        );
        metrics::record_backend_state(&self.name, backend.name(), transition.to);
    }

    /// Hand freed capacity to waiting requests in FIFO order.
    pub(crate) fn drain_backlog(self: &Arc<Self>) {
        if self.backlog.is_empty() {
            return;
        }

        let handoffs = self.backlog.dequeue_ready(
            Instant::now(),
            || {
                if self.is_closed() {
                    return None;
                }
                self.policy.select(&self.backends, &Eligibility::alive_only())
            },
            |index| self.bind(index),
        );
        metrics::record_backlog_depth(&self.name, self.backlog.depth());

        for (waiter, result) in handoffs {
            if let Ok(session) = &result {
                tracing::debug!(
                    pool = %self.name,
                    backend = session.backend_index,
                    "Backlogged request routed"
                );
            }
            waiter.deliver(result);
        }
    }

    fn release_handles(&self) {
        if self
            .released
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        for backend in &self.backends {
            backend.handle().release();
        }
        tracing::info!(
            pool = %self.name,
            generation = self.generation,
            targets = self.backends.len(),
            "Target handles released"
        );
    }
}

impl Drop for BackendPool {
    fn drop(&mut self) {
        // No session can outlive the pool, so nothing is in flight here
        self.closed.store(true, Ordering::SeqCst);
        self.release_handles();
    }
}

fn outcome_label(error: &RoutingError) -> &'static str {
    match error {
        RoutingError::NoEligibleBackend => "no_eligible_backend",
        RoutingError::PoolClosed => "closed",
        RoutingError::StaleSession { .. } => "stale_session",
        RoutingError::BacklogFull => "backlog_full",
    }
}
