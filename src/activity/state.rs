//! Edge-triggered active request counter.
//!
//! # Responsibilities
//! - Count requests currently inside the wrapped handler
//! - Fire `on_active` exactly once per 0 → 1 crossing, before dispatch
//! - Fire `on_idle` exactly once per 1 → 0 crossing, after completion
//!
//! # Design Decisions
//! - The value returned by `fetch_add`/`fetch_sub` alone decides which
//!   request crossed the boundary; no lock spans the counter
//! - Decrement lives in an RAII guard so cancelled or panicking requests
//!   still leave the counter consistent

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::activity::hooks::{fire, Edge, StateHook};
use crate::observability::metrics;

/// Shared activity counter plus its edge hooks.
#[derive(Debug)]
pub struct ConcurrencyState {
    active: AtomicUsize,
    on_active: Option<StateHook>,
    on_idle: Option<StateHook>,
}

impl ConcurrencyState {
    pub fn new(on_active: Option<StateHook>, on_idle: Option<StateHook>) -> Self {
        Self {
            active: AtomicUsize::new(0),
            on_active,
            on_idle,
        }
    }

    /// A counter with no hooks.
    pub fn passthrough() -> Self {
        Self::new(None, None)
    }

    /// Requests currently between `enter` and exit.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn has_hooks(&self) -> bool {
        self.on_active.is_some() || self.on_idle.is_some()
    }

    /// Register a request. Resolves once the request may be dispatched.
    ///
    /// The request that moves the counter from 0 to 1 awaits `on_active`
    /// first; everyone else returns immediately.
    pub async fn enter(self: &Arc<Self>) -> ActivityGuard {
        let previous = self.active.fetch_add(1, Ordering::AcqRel);
        // Built before the hook runs: cancelling `enter` still decrements.
        let guard = ActivityGuard {
            state: self.clone(),
            exited: false,
        };
        metrics::record_active_requests(previous + 1);

        if previous == 0 {
            tracing::debug!("Concurrency state: idle -> active");
            metrics::record_state_transition(Edge::Resume.as_str());
            if let Some(hook) = &self.on_active {
                fire(hook, Edge::Resume).await;
            }
        }

        guard
    }

    /// Returns true when this decrement crossed 1 → 0.
    fn leave(&self) -> bool {
        let previous = self.active.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            tracing::error!("Concurrency state counter decremented below zero");
            panic!("concurrency state counter underflow");
        }
        metrics::record_active_requests(previous - 1);

        if previous == 1 {
            tracing::debug!("Concurrency state: active -> idle");
            metrics::record_state_transition(Edge::Pause.as_str());
            true
        } else {
            false
        }
    }
}

impl Default for ConcurrencyState {
    fn default() -> Self {
        Self::passthrough()
    }
}

/// Proof that a request is counted as active.
///
/// Call [`ActivityGuard::exit`] once the request has completed. If the guard
/// is dropped instead, the count is still decremented and any pause hook is
/// spawned onto the current runtime.
#[derive(Debug)]
#[must_use = "dropping the guard immediately marks the request as finished"]
pub struct ActivityGuard {
    state: Arc<ConcurrencyState>,
    exited: bool,
}

impl ActivityGuard {
    /// Mark the request finished, awaiting `on_idle` if this was the last one.
    pub async fn exit(mut self) {
        self.exited = true;
        if self.state.leave() {
            if let Some(hook) = &self.state.on_idle {
                fire(hook, Edge::Pause).await;
            }
        }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        if !self.state.leave() {
            return;
        }
        let Some(hook) = self.state.on_idle.clone() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    fire(&hook, Edge::Pause).await;
                });
            }
            Err(_) => {
                tracing::error!("No runtime available, pause hook for abandoned request skipped");
            }
        }
    }
}
