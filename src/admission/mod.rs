//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → middleware.rs (deadline from config, 503 on shed)
//!     → breaker.rs (permit free? run : queue has room? wait : shed)
//!     → inner handler runs holding the permit
//!     → permit rides in the response body until it is fully sent
//!     → permit dropped → oldest waiter admitted
//!
//! Capacity signal (admin API, config reload):
//!     → Breaker::update_concurrency → oldest waiters admitted in-call
//! ```
//!
//! # Design Decisions
//! - "No breaker" and "unbounded breaker" behave identically
//! - Strict FIFO among waiters; no barging past the queue
//! - Shed is an expected outcome, not a fault: logged at debug only

pub mod breaker;
pub mod middleware;

use std::future::Future;

use tokio::time::Instant;

pub use breaker::{Breaker, BreakerError, BreakerParams, OwnedPermit, Permit};
pub use middleware::{admission_middleware, AdmissionState};

/// Run `work` through an optional breaker.
///
/// `None` admits immediately, exactly like a breaker built with
/// `max_concurrency == 0`.
pub async fn admit<F, Fut>(
    breaker: Option<&Breaker>,
    deadline: Option<Instant>,
    work: F,
) -> Result<Fut::Output, BreakerError>
where
    F: FnOnce() -> Fut,
    Fut: Future,
{
    match (breaker, deadline) {
        (None, _) => Ok(work().await),
        (Some(breaker), Some(deadline)) => breaker.maybe_until(deadline, work).await,
        (Some(breaker), None) => breaker.maybe(work).await,
    }
}
