//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → SidecarConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → sent to the server over an mpsc channel
//!     → server applies the new admission capacity
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only capacity is live-reloadable; concurrency ceiling and queue depth
//!   are fixed for the life of the instance

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, AdmissionConfig, BackendConfig, FreezerConfig, ListenerConfig,
    ObservabilityConfig, SidecarConfig, TimeoutConfig,
};
