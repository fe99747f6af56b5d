//! Queue sidecar library.
//!
//! Concurrency control for a request-level reverse proxy placed in front of
//! a single backing process: admission control with bounded queueing, and
//! idle/active edge tracking that drives an external freezer.

pub mod activity;
pub mod admin;
pub mod admission;
pub mod config;
pub mod freezer;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use activity::{ConcurrencyState, ConcurrencyStateLayer, StateHook};
pub use admission::{Breaker, BreakerError, BreakerParams};
pub use config::SidecarConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
