//! Admin API.
//!
//! # Routes
//! ```text
//! GET /admin/status        → breaker + activity snapshot
//! PUT /admin/concurrency   → {"capacity": N}, applies update_concurrency
//! ```
//!
//! All routes require `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, put},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::activity::ConcurrencyState;
use crate::admission::Breaker;

/// Shared state for the admin routes.
#[derive(Clone, Debug)]
pub struct AdminState {
    pub breaker: Option<Arc<Breaker>>,
    pub activity: Arc<ConcurrencyState>,
    api_key: Arc<str>,
}

impl AdminState {
    pub fn new(
        breaker: Option<Arc<Breaker>>,
        activity: Arc<ConcurrencyState>,
        api_key: &str,
    ) -> Self {
        Self {
            breaker,
            activity,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/concurrency", put(put_concurrency))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
