//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, graceful shutdown, config updates)
//!     → request.rs (assign / propagate request ID)
//!     → proxy.rs (admission → activity → forward to backend)
//!     → body.rs (permit and activity guard ride in the response body)
//!     → Send to client
//! ```

pub mod body;
pub mod proxy;
pub mod request;
pub mod server;

pub use body::GuardedBody;
pub use proxy::{proxy_router, ForwardState, ProxyParts};
pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{HttpServer, ServerError};
