//! Bounded-concurrency, bounded-queue admission gate.
//!
//! # Responsibilities
//! - Admit up to `capacity` callers at once
//! - Park up to `queue_depth` further callers in strict arrival order
//! - Shed everything beyond that immediately
//! - Let an external signal move `capacity` within `[0, max_concurrency]`
//!
//! # Design Decisions
//! - One mutex guards the permit count, capacity and wait list; no caller
//!   code ever runs while it is held
//! - Each waiter owns a oneshot receiver; a release hands its permit directly
//!   to the oldest waiter, so in-flight accounting never double counts
//! - Dropping a waiting future is the cancellation primitive: the ticket is
//!   removed without waking anybody else
//! - `max_concurrency == 0` turns the gate into a pass-through

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::observability::metrics;

/// Construction parameters for a [`Breaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerParams {
    /// Maximum number of callers allowed to wait once capacity is exhausted.
    pub queue_depth: usize,
    /// Hard ceiling on concurrently admitted callers. `0` disables the gate.
    pub max_concurrency: usize,
    /// Starting concurrency limit. Clamped to `max_concurrency`.
    pub initial_capacity: usize,
}

/// Why a caller was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BreakerError {
    /// Capacity exhausted and the wait queue already holds `queue_depth` callers.
    #[error("pending request queue full")]
    QueueFull,
    /// The caller's deadline fired while it was still waiting.
    #[error("deadline exceeded while waiting for admission")]
    DeadlineExceeded,
}

struct Waiter {
    ticket: u64,
    wake: oneshot::Sender<()>,
}

struct BreakerState {
    capacity: usize,
    in_flight: usize,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

/// Admission gate shared by every request handled by one sidecar instance.
pub struct Breaker {
    max_concurrency: usize,
    queue_depth: usize,
    state: Mutex<BreakerState>,

    // Mirrors of `state` for lock-free reporting.
    capacity: AtomicUsize,
    in_flight: AtomicUsize,
    pending: AtomicUsize,
}

enum Entry {
    Admitted,
    Queued(u64, oneshot::Receiver<()>),
}

impl Breaker {
    /// Create a breaker. An `initial_capacity` above `max_concurrency` is
    /// clamped rather than rejected.
    pub fn new(params: BreakerParams) -> Self {
        let capacity = if params.initial_capacity > params.max_concurrency {
            tracing::warn!(
                initial_capacity = params.initial_capacity,
                max_concurrency = params.max_concurrency,
                "Initial capacity exceeds max concurrency, clamping"
            );
            params.max_concurrency
        } else {
            params.initial_capacity
        };

        Self {
            max_concurrency: params.max_concurrency,
            queue_depth: params.queue_depth,
            state: Mutex::new(BreakerState {
                capacity,
                in_flight: 0,
                waiters: VecDeque::with_capacity(params.queue_depth.min(1024)),
                next_ticket: 0,
            }),
            capacity: AtomicUsize::new(capacity),
            in_flight: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
        }
    }

    /// True when the gate admits everything without accounting.
    pub fn is_unbounded(&self) -> bool {
        self.max_concurrency == 0
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Current effective concurrency limit.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Number of permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Number of callers currently waiting for a permit.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Run `work` under a permit, waiting in the queue if necessary.
    ///
    /// The permit is released when `work` completes, panics, or is dropped.
    pub async fn maybe<F, Fut>(&self, work: F) -> Result<Fut::Output, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let _permit = self.acquire().await?;
        Ok(work().await)
    }

    /// Like [`Breaker::maybe`], but gives up waiting at `deadline`.
    pub async fn maybe_until<F, Fut>(
        &self,
        deadline: Instant,
        work: F,
    ) -> Result<Fut::Output, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let _permit = self.acquire_until(deadline).await?;
        Ok(work().await)
    }

    /// Acquire a permit, waiting without a deadline if the gate is saturated.
    pub async fn acquire(&self) -> Result<Permit<'_>, BreakerError> {
        self.acquire_inner(None).await
    }

    /// Acquire a permit, waiting at most until `deadline`.
    pub async fn acquire_until(&self, deadline: Instant) -> Result<Permit<'_>, BreakerError> {
        self.acquire_inner(Some(deadline)).await
    }

    /// Acquire a permit that owns a handle to the breaker, so it can outlive
    /// the current borrow (e.g. travel inside a streaming response body).
    pub async fn acquire_owned(
        self: &Arc<Self>,
        deadline: Option<Instant>,
    ) -> Result<OwnedPermit, BreakerError> {
        let mut permit = self.acquire_inner(deadline).await?;
        let held = permit.breaker.take().is_some();
        Ok(OwnedPermit {
            breaker: held.then(|| self.clone()),
        })
    }

    /// Take a permit only if one is free right now and nobody is queued.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        if self.is_unbounded() {
            return Some(Permit { breaker: None });
        }

        let mut state = self.lock();
        if state.in_flight < state.capacity && state.waiters.is_empty() {
            state.in_flight += 1;
            self.publish(&state);
            Some(Permit { breaker: Some(self) })
        } else {
            None
        }
    }

    /// Set the effective limit to `min(capacity, max_concurrency)`.
    ///
    /// Raising the limit admits the oldest waiters as part of this call.
    /// Lowering it never revokes held permits; the excess drains on release.
    pub fn update_concurrency(&self, capacity: usize) {
        if self.is_unbounded() {
            tracing::debug!(capacity, "Ignoring capacity update for unbounded breaker");
            return;
        }

        let capacity = capacity.min(self.max_concurrency);
        let mut state = self.lock();
        let previous = state.capacity;
        state.capacity = capacity;
        self.dispatch(&mut state);

        tracing::debug!(
            previous,
            capacity,
            in_flight = state.in_flight,
            pending = state.waiters.len(),
            "Breaker capacity updated"
        );
    }

    async fn acquire_inner(&self, deadline: Option<Instant>) -> Result<Permit<'_>, BreakerError> {
        let (ticket, rx) = match self.enter()? {
            Entry::Admitted => {
                let breaker = if self.is_unbounded() { None } else { Some(self) };
                return Ok(Permit { breaker });
            }
            Entry::Queued(ticket, rx) => (ticket, rx),
        };

        let mut wait = Wait {
            breaker: self,
            ticket,
            rx,
            settled: false,
        };

        let woken = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, &mut wait.rx).await.ok(),
            None => Some((&mut wait.rx).await),
        };

        match woken {
            Some(Ok(())) => {
                wait.settled = true;
                Ok(Permit { breaker: Some(self) })
            }
            // Senders are only dropped after a successful send or together
            // with the breaker itself, which outlives this borrow.
            Some(Err(_)) => unreachable!("admission waiter dropped while queued"),
            None => {
                tracing::debug!(ticket, "Admission deadline exceeded while queued");
                Err(BreakerError::DeadlineExceeded)
            }
        }
    }

    fn enter(&self) -> Result<Entry, BreakerError> {
        if self.is_unbounded() {
            return Ok(Entry::Admitted);
        }

        let mut state = self.lock();
        if state.in_flight < state.capacity && state.waiters.is_empty() {
            state.in_flight += 1;
            self.publish(&state);
            return Ok(Entry::Admitted);
        }

        if state.waiters.len() >= self.queue_depth {
            tracing::debug!(
                in_flight = state.in_flight,
                capacity = state.capacity,
                pending = state.waiters.len(),
                "Admission queue full, shedding"
            );
            return Err(BreakerError::QueueFull);
        }

        let (wake, rx) = oneshot::channel();
        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.waiters.push_back(Waiter { ticket, wake });
        self.publish(&state);

        Ok(Entry::Queued(ticket, rx))
    }

    fn release(&self) {
        let mut state = self.lock();
        self.release_locked(&mut state);
    }

    fn release_locked(&self, state: &mut BreakerState) {
        if state.in_flight == 0 {
            tracing::error!(
                capacity = state.capacity,
                pending = state.waiters.len(),
                "Breaker permit released while none were held"
            );
            panic!("breaker released more permits than it granted");
        }

        state.in_flight -= 1;
        self.dispatch(state);
    }

    /// Hand free slots to the oldest waiters.
    fn dispatch(&self, state: &mut BreakerState) {
        while state.in_flight < state.capacity {
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            state.in_flight += 1;
            if waiter.wake.send(()).is_err() {
                state.in_flight -= 1;
            }
        }
        self.publish(state);
    }

    fn publish(&self, state: &BreakerState) {
        self.capacity.store(state.capacity, Ordering::Relaxed);
        self.in_flight.store(state.in_flight, Ordering::Relaxed);
        self.pending.store(state.waiters.len(), Ordering::Relaxed);
        metrics::record_breaker(self);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().expect("breaker mutex poisoned")
    }
}

impl std::fmt::Debug for Breaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Breaker")
            .field("max_concurrency", &self.max_concurrency)
            .field("queue_depth", &self.queue_depth)
            .field("capacity", &self.capacity())
            .field("in_flight", &self.in_flight())
            .field("pending", &self.pending())
            .finish()
    }
}

/// A held admission slot. Released on drop.
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: Option<&'a Breaker>,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker {
            breaker.release();
        }
    }
}

/// A held admission slot that keeps its breaker alive. Released on drop.
#[derive(Debug)]
pub struct OwnedPermit {
    breaker: Option<Arc<Breaker>>,
}

impl Drop for OwnedPermit {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker.take() {
            breaker.release();
        }
    }
}

/// A queued ticket. Dropping it unsettled withdraws the ticket.
struct Wait<'a> {
    breaker: &'a Breaker,
    ticket: u64,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut state = self.breaker.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.ticket == self.ticket) {
            state.waiters.remove(pos);
            self.breaker.publish(&state);
            return;
        }

        // Granted after the deadline fired but before we got here: the permit
        // is ours, pass it on.
        self.breaker.release_locked(&mut state);
    }
}
