use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::admission::Breaker;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakerStatus {
    pub max_concurrency: usize,
    pub queue_depth: usize,
    pub capacity: usize,
    pub in_flight: usize,
    pub pending: usize,
}

impl From<&Breaker> for BreakerStatus {
    fn from(breaker: &Breaker) -> Self {
        Self {
            max_concurrency: breaker.max_concurrency(),
            queue_depth: breaker.queue_depth(),
            capacity: breaker.capacity(),
            in_flight: breaker.in_flight(),
            pending: breaker.pending(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub breaker: Option<BreakerStatus>,
    pub active_requests: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConcurrencyUpdate {
    pub capacity: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        breaker: state.breaker.as_deref().map(BreakerStatus::from),
        active_requests: state.activity.active(),
    })
}

pub async fn put_concurrency(
    State(state): State<AdminState>,
    Json(update): Json<ConcurrencyUpdate>,
) -> Result<Json<BreakerStatus>, (StatusCode, &'static str)> {
    let Some(breaker) = state.breaker.as_deref() else {
        return Err((StatusCode::CONFLICT, "No breaker configured"));
    };

    breaker.update_concurrency(update.capacity);
    tracing::info!(
        requested = update.capacity,
        capacity = breaker.capacity(),
        "Capacity updated via admin API"
    );

    Ok(Json(BreakerStatus::from(breaker)))
}
