//! Axum middleware that gates requests on the breaker.
//!
//! The permit is moved into the response body, so a slot stays taken until
//! the backend's response has been fully streamed to the client.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::time::Instant;

use crate::admission::{Breaker, BreakerError};
use crate::http::body::GuardedBody;
use crate::observability::metrics;

/// State for the admission middleware.
#[derive(Clone, Debug, Default)]
pub struct AdmissionState {
    /// `None` admits everything.
    pub breaker: Option<Arc<Breaker>>,
    /// Longest a request may wait in the queue.
    pub queue_timeout: Option<Duration>,
}

impl AdmissionState {
    pub fn new(breaker: Option<Arc<Breaker>>, queue_timeout: Option<Duration>) -> Self {
        Self {
            breaker,
            queue_timeout,
        }
    }
}

/// Admit the request through the breaker, or answer 503 when shed.
pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(breaker) = &state.breaker else {
        return next.run(request).await;
    };

    let deadline = state.queue_timeout.map(|timeout| Instant::now() + timeout);
    let permit = match breaker.acquire_owned(deadline).await {
        Ok(permit) => permit,
        Err(err) => return shed(err),
    };

    next.run(request)
        .await
        .map(|body| GuardedBody::wrap(body, permit))
}

fn shed(err: BreakerError) -> Response {
    let reason = match err {
        BreakerError::QueueFull => "queue_full",
        BreakerError::DeadlineExceeded => "deadline_exceeded",
    };
    tracing::debug!(reason, "Request shed by breaker");
    metrics::record_shed(reason);
    (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
}
