//! Bounded FIFO wait queue for requests that cannot be routed yet.
//!
//! # Responsibilities
//! - Park requests while every selectable backend is overloaded
//! - Hand sessions to waiters in arrival order when load drops
//! - Expire waiters whose deadline passed
//! - Let a waiter cancel itself (client disconnect, deadline)
//!
//! # Design Decisions
//! - Enqueue returns immediately with a ticket; selection never blocks
//! - Each entry is claimed through a single compare-and-swap, so a cancel
//!   racing a dequeue has exactly one winner and the loser is a no-op
//! - Sessions are never dropped while the queue lock is held

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::load_balancer::{BackendPool, BacklogError, RoutingError, RoutingSession};

const WAITING: u8 = 0;
const CONSUMED: u8 = 1;
const CANCELLED: u8 = 2;

type Delivery = Result<RoutingSession, BacklogError>;

/// Result of `BackendPool::select_or_enqueue`.
#[derive(Debug)]
pub enum Admission {
    /// Routed straight away.
    Routed(RoutingSession),
    /// Parked in the backlog; await the ticket.
    Queued(BacklogTicket),
}

/// One parked request.
pub(crate) struct Waiter {
    id: u64,
    deadline: Instant,
    state: AtomicU8,
    tx: Mutex<Option<oneshot::Sender<Delivery>>>,
}

impl Waiter {
    fn claim(&self, to: u8) -> bool {
        self.state
            .compare_exchange(WAITING, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn is_waiting(&self) -> bool {
        self.state.load(Ordering::SeqCst) == WAITING
    }

    /// Claim the entry for cancellation. False if a dequeue got there first.
    pub(crate) fn cancel(&self) -> bool {
        self.claim(CANCELLED)
    }

    /// Send the outcome to the ticket. A session the ticket no longer wants
    /// is dropped here, which finalises it.
    pub(crate) fn deliver(&self, result: Delivery) {
        let tx = self.tx.lock().expect("backlog waiter mutex poisoned").take();
        if let Some(tx) = tx {
            let _ = tx.send(result);
        }
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("state", &self.state.load(Ordering::SeqCst))
            .finish()
    }
}

#[derive(Default)]
struct Queue {
    entries: VecDeque<Arc<Waiter>>,
    closed: bool,
}

/// The wait queue owned by a pool.
pub(crate) struct Backlog {
    capacity: usize,
    queue: Mutex<Queue>,
    depth: AtomicUsize,
    next_id: AtomicU64,
}

impl Backlog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: Mutex::new(Queue::default()),
            depth: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.capacity > 0
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    pub(crate) fn enqueue(
        &self,
        deadline: Instant,
    ) -> Result<(Arc<Waiter>, oneshot::Receiver<Delivery>), RoutingError> {
        let mut queue = self.queue.lock().expect("backlog mutex poisoned");
        if queue.closed {
            return Err(RoutingError::PoolClosed);
        }
        if queue.entries.len() >= self.capacity {
            return Err(RoutingError::BacklogFull);
        }

        let (tx, rx) = oneshot::channel();
        let waiter = Arc::new(Waiter {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            deadline,
            state: AtomicU8::new(WAITING),
            tx: Mutex::new(Some(tx)),
        });
        queue.entries.push_back(waiter.clone());
        self.depth.store(queue.entries.len(), Ordering::SeqCst);
        Ok((waiter, rx))
    }

    /// Remove a cancelled entry.
    pub(crate) fn remove(&self, waiter: &Arc<Waiter>) {
        let mut queue = self.queue.lock().expect("backlog mutex poisoned");
        queue.entries.retain(|w| !Arc::ptr_eq(w, waiter));
        self.depth.store(queue.entries.len(), Ordering::SeqCst);
    }

    /// Refuse new entries and hand back everything still queued.
    pub(crate) fn close(&self) -> Vec<Arc<Waiter>> {
        let mut queue = self.queue.lock().expect("backlog mutex poisoned");
        queue.closed = true;
        self.depth.store(0, Ordering::SeqCst);
        queue.entries.drain(..).collect()
    }

    /// Pop waiters from the front while `select` finds a backend for them.
    ///
    /// Expired waiters are claimed and answered with `DeadlineElapsed`.
    /// The returned hand-offs must be delivered after this returns.
    pub(crate) fn dequeue_ready<S, B>(
        &self,
        now: Instant,
        mut select: S,
        mut bind: B,
    ) -> Vec<(Arc<Waiter>, Delivery)>
    where
        S: FnMut() -> Option<usize>,
        B: FnMut(usize) -> RoutingSession,
    {
        let mut handoffs = Vec::new();
        let mut queue = self.queue.lock().expect("backlog mutex poisoned");

        while let Some(front) = queue.entries.front() {
            if !front.is_waiting() {
                queue.entries.pop_front();
                continue;
            }
            if front.deadline <= now {
                if let Some(waiter) = queue.entries.pop_front() {
                    if waiter.claim(CANCELLED) {
                        handoffs.push((waiter, Err(BacklogError::DeadlineElapsed)));
                    }
                }
                continue;
            }

            let Some(index) = select() else {
                break;
            };
            let Some(waiter) = queue.entries.pop_front() else {
                break;
            };
            if waiter.claim(CONSUMED) {
                handoffs.push((waiter, Ok(bind(index))));
            }
        }

        self.depth.store(queue.entries.len(), Ordering::SeqCst);
        handoffs
    }
}

impl fmt::Debug for Backlog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backlog")
            .field("capacity", &self.capacity)
            .field("depth", &self.depth())
            .finish()
    }
}

/// Handle to a request parked in the backlog.
///
/// Dropping the ticket cancels the wait. If a session was already handed
/// over, it is finalised instead.
#[derive(Debug)]
pub struct BacklogTicket {
    pool: Arc<BackendPool>,
    waiter: Arc<Waiter>,
    rx: Option<oneshot::Receiver<Delivery>>,
}

impl BacklogTicket {
    pub(crate) fn new(
        pool: Arc<BackendPool>,
        waiter: Arc<Waiter>,
        rx: oneshot::Receiver<Delivery>,
    ) -> Self {
        Self {
            pool,
            waiter,
            rx: Some(rx),
        }
    }

    pub fn id(&self) -> u64 {
        self.waiter.id
    }

    pub fn deadline(&self) -> Instant {
        self.waiter.deadline
    }

    /// Wait for a backend until the ticket's deadline.
    pub async fn wait(mut self) -> Result<RoutingSession, BacklogError> {
        let Some(mut rx) = self.rx.take() else {
            return Err(BacklogError::Cancelled);
        };

        match tokio::time::timeout_at(self.waiter.deadline, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BacklogError::PoolClosed),
            Err(_) => {
                if self.waiter.cancel() {
                    self.pool.backlog_remove(&self.waiter);
                    tracing::debug!(
                        pool = %self.pool.name(),
                        ticket = self.waiter.id,
                        "Backlog deadline elapsed"
                    );
                    return Err(BacklogError::DeadlineElapsed);
                }
                // A dequeue claimed the entry first; its outcome is on the way
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(BacklogError::PoolClosed),
                }
            }
        }
    }

    /// Withdraw from the backlog. Returns false if a backend was already
    /// assigned, in which case that session is finalised.
    pub fn cancel(mut self) -> bool {
        self.withdraw()
    }

    fn withdraw(&mut self) -> bool {
        if self.waiter.cancel() {
            self.pool.backlog_remove(&self.waiter);
            true
        } else {
            false
        }
    }
}

impl Drop for BacklogTicket {
    fn drop(&mut self) {
        self.withdraw();
    }
}

impl BackendPool {
    pub(crate) fn backlog_remove(&self, waiter: &Arc<Waiter>) {
        self.backlog().remove(waiter);
        crate::observability::metrics::record_backlog_depth(self.name(), self.backlog_depth());
    }
}
