//! API endpoints for the flow shield.
//!
//! The gated surface serves protected traffic through the admission gate; the
//! admin surface exposes limits, detection state and metrics.

pub mod admin;
pub mod gate;

pub use admin::AdminState;
pub use gate::{admit, source_identity};
