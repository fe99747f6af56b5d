//! Pause/resume callbacks.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::observability::metrics;

/// Error returned by a failing hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

type HookFn = dyn Fn() -> BoxFuture<'static, Result<(), HookError>> + Send + Sync;

/// A zero-argument callback fired on an idle/active edge.
#[derive(Clone)]
pub struct StateHook {
    inner: Arc<HookFn>,
}

impl StateHook {
    /// Wrap an async callback.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move || f().boxed()),
        }
    }

    /// Wrap a plain synchronous callback that cannot fail.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move || {
            let f = f.clone();
            async move {
                f();
                Ok(())
            }
        })
    }

    fn invoke(&self) -> BoxFuture<'static, Result<(), HookError>> {
        let inner = self.inner.clone();
        // Calling `inner` inside the future keeps a panicking constructor
        // within reach of `catch_unwind`.
        async move { inner().await }.boxed()
    }
}

impl std::fmt::Debug for StateHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StateHook")
    }
}

/// Which boundary a hook belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// 0 → 1.
    Resume,
    /// 1 → 0.
    Pause,
}

impl Edge {
    pub fn as_str(self) -> &'static str {
        match self {
            Edge::Resume => "resume",
            Edge::Pause => "pause",
        }
    }
}

/// Run `hook`, containing any error or panic.
pub(crate) async fn fire(hook: &StateHook, edge: Edge) {
    let started = Instant::now();
    let outcome = AssertUnwindSafe(hook.invoke()).catch_unwind().await;

    match outcome {
        Ok(Ok(())) => {
            tracing::debug!(
                edge = edge.as_str(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Concurrency state hook completed"
            );
        }
        Ok(Err(err)) => {
            tracing::error!(edge = edge.as_str(), error = %err, "Concurrency state hook failed");
            metrics::record_hook_failure(edge.as_str());
        }
        Err(_) => {
            tracing::error!(edge = edge.as_str(), "Concurrency state hook panicked");
            metrics::record_hook_failure(edge.as_str());
        }
    }
}
