//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a downstream target as a shared, reference-counted handle
//! - Track in-flight load per backend
//! - Track health state and consecutive connection failures

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

use crate::health::state::{next_state, BackendState, HealthEvent, HealthThresholds, Transition};

/// Description of a downstream destination as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub name: String,
    pub address: Url,
}

impl TargetDescriptor {
    /// Parse an address into a descriptor. The address must carry a host.
    pub fn parse(name: &str, address: &str) -> Result<Self, String> {
        let url = Url::parse(address).map_err(|e| e.to_string())?;
        if url.host_str().is_none() {
            return Err(format!("address '{}' has no host", address));
        }
        Ok(Self {
            name: name.to_string(),
            address: url,
        })
    }
}

#[derive(Debug)]
struct Target {
    descriptor: TargetDescriptor,
    holders: AtomicUsize,
}

/// Opaque, shared handle to a downstream destination.
///
/// Cloning shares the target. The explicit holder count is what pools
/// acquire on construction and release on teardown.
#[derive(Clone)]
pub struct TargetHandle {
    inner: Arc<Target>,
}

impl TargetHandle {
    pub fn new(descriptor: TargetDescriptor) -> Self {
        Self {
            inner: Arc::new(Target {
                descriptor,
                holders: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    pub fn address(&self) -> &Url {
        &self.inner.descriptor.address
    }

    /// Number of pools currently holding this target.
    pub fn holders(&self) -> usize {
        self.inner.holders.load(Ordering::SeqCst)
    }

    /// True if both handles refer to the same target.
    pub fn same_target(&self, other: &TargetHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn acquire(&self) -> TargetHandle {
        self.inner.holders.fetch_add(1, Ordering::SeqCst);
        self.clone()
    }

    pub(crate) fn release(&self) {
        let released = self
            .inner
            .holders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if released.is_err() {
            panic!(
                "target '{}' released more times than it was acquired",
                self.name()
            );
        }
    }
}

impl fmt::Debug for TargetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetHandle")
            .field("name", &self.name())
            .field("address", &self.address().as_str())
            .field("holders", &self.holders())
            .finish()
    }
}

/// A single pool member.
#[derive(Debug)]
pub struct Backend {
    handle: TargetHandle,
    /// Requests currently routed here and not yet finalised.
    load: AtomicUsize,
    /// Current health state (see `BackendState`).
    state: AtomicU8,
    /// Consecutive connection-level failures.
    consecutive_failures: AtomicU32,
}

impl Backend {
    /// Wrap an already acquired handle.
    pub(crate) fn new(handle: TargetHandle) -> Self {
        Self {
            handle,
            load: AtomicUsize::new(0),
            state: AtomicU8::new(BackendState::Alive as u8),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn handle(&self) -> &TargetHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn load(&self) -> usize {
        self.load.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> BackendState {
        BackendState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_eligible(&self) -> bool {
        self.state().is_eligible()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Increment load, returning the new value.
    pub(crate) fn inc_load(&self) -> usize {
        self.load.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement load, returning the new value.
    ///
    /// An underflow means a session was finalised twice and load accounting
    /// is corrupt for every later selection, so it panics.
    pub(crate) fn dec_load(&self) -> usize {
        match self
            .load
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(prev) => prev - 1,
            Err(_) => panic!("load underflow on backend '{}'", self.name()),
        }
    }

    /// Apply a health event, returning the transition if the state changed.
    ///
    /// Load events are judged against the live counter, not the value the
    /// caller saw, so an update that lost a race with a later load change
    /// cannot leave the state behind the counter.
    pub(crate) fn apply(
        &self,
        event: HealthEvent,
        thresholds: &HealthThresholds,
    ) -> Option<Transition> {
        let mut transition: Option<Transition> = None;
        loop {
            let mut seen = event;
            let result = self
                .state
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                    seen = self.current(event);
                    let current = BackendState::from(raw);
                    let next = next_state(current, seen, thresholds);
                    (next != current).then_some(next as u8)
                });

            if let Ok(prev) = result {
                let from = BackendState::from(prev);
                let to = next_state(from, seen, thresholds);
                transition = Some(Transition {
                    from: transition.map_or(from, |t| t.from),
                    to,
                });
            }

            match seen {
                HealthEvent::Load(load) if load != self.load() => continue,
                _ => break,
            }
        }
        transition.filter(|t| t.from != t.to)
    }

    fn current(&self, event: HealthEvent) -> HealthEvent {
        match event {
            HealthEvent::Load(_) => HealthEvent::Load(self.load()),
            other => other,
        }
    }

    /// Count a connection-level failure, returning the new streak length.
    pub(crate) fn inc_failures(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> TargetHandle {
        TargetHandle::new(TargetDescriptor::parse(name, "http://127.0.0.1:8080").unwrap())
    }

    #[test]
    fn test_descriptor_requires_host() {
        assert!(TargetDescriptor::parse("a", "http://10.0.0.1:80").is_ok());
        assert!(TargetDescriptor::parse("a", "not a url").is_err());
        assert!(TargetDescriptor::parse("a", "unix:/tmp/sock").is_err());
    }

    #[test]
    fn test_acquire_release() {
        let h = handle("a");
        assert_eq!(h.holders(), 0);

        let held = h.acquire();
        assert!(held.same_target(&h));
        assert_eq!(h.holders(), 1);

        held.release();
        assert_eq!(h.holders(), 0);
    }

    #[test]
    #[should_panic(expected = "released more times")]
    fn test_release_without_acquire_panics() {
        handle("a").release();
    }

    #[test]
    fn test_load_counter() {
        let b = Backend::new(handle("a").acquire());
        assert_eq!(b.inc_load(), 1);
        assert_eq!(b.inc_load(), 2);
        assert_eq!(b.dec_load(), 1);
        assert_eq!(b.load(), 1);
    }

    #[test]
    #[should_panic(expected = "load underflow")]
    fn test_load_underflow_panics() {
        let b = Backend::new(handle("a").acquire());
        b.dec_load();
    }

    #[test]
    fn test_apply_reports_transition() {
        let b = Backend::new(handle("a").acquire());
        let t = HealthThresholds::default();

        assert_eq!(b.state(), BackendState::Alive);
        let tr = b.apply(HealthEvent::ConnectionFailure, &t).unwrap();
        assert_eq!(tr.from, BackendState::Alive);
        assert_eq!(tr.to, BackendState::Down);
        assert!(!b.is_eligible());

        // No change, no transition
        assert!(b.apply(HealthEvent::ConnectionFailure, &t).is_none());
    }

    fn watermarks() -> HealthThresholds {
        HealthThresholds {
            failure_threshold: 1,
            high_water: 2,
            low_water: 1,
        }
    }

    #[test]
    fn test_stale_high_load_does_not_overload_idle_backend() {
        let b = Backend::new(handle("a").acquire());
        assert!(b.apply(HealthEvent::Load(5), &watermarks()).is_none());
        assert_eq!(b.state(), BackendState::Alive);
    }

    #[test]
    fn test_stale_load_event_follows_live_counter() {
        let b = Backend::new(handle("a").acquire());
        let t = watermarks();
        b.inc_load();
        b.inc_load();
        let tr = b.apply(HealthEvent::Load(2), &t).unwrap();
        assert_eq!(tr.to, BackendState::Overloaded);

        // Load drains before the matching events arrive
        b.dec_load();
        b.dec_load();
        let tr = b.apply(HealthEvent::Load(2), &t).unwrap();
        assert_eq!(tr.from, BackendState::Overloaded);
        assert_eq!(tr.to, BackendState::Alive);
    }
}
