//! Idle-state tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted request:
//!     → layer.rs (tower middleware around the forwarding handler)
//!     → state.rs (fetch_add; 0 → 1 awaits on_active)
//!     → inner service
//!     → state.rs (fetch_sub; 1 → 0 awaits on_idle)
//!
//! hooks.rs: on_active / on_idle callbacks, errors and panics contained
//! ```
//!
//! # Design Decisions
//! - Edge detection from atomic read-modify-write results only
//! - Absent hooks are `None`, leaving a pure counter
//! - Only the crossing request waits on a hook; overlapping requests never do

pub mod hooks;
pub mod layer;
pub mod state;

pub use hooks::{Edge, HookError, StateHook};
pub use layer::{ConcurrencyStateLayer, ConcurrencyStateService};
pub use state::{ActivityGuard, ConcurrencyState};
