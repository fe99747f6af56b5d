//! Freezer relay.
//!
//! Turns the idle/active edges into HTTP calls against an external freezer
//! that suspends and thaws the backing process.
//!
//! # Wire Format
//! ```text
//! POST <endpoint>
//! Content-Type: application/json
//! Token: <service account token>      (optional)
//!
//! {"action":"pause"} | {"action":"resume"}
//! ```

pub mod client;

pub use client::{FreezerClient, FreezerError};
