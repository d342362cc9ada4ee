//! Flow shield
//!
//! Real-time per-source flood detection with an HTTP admission gate. Sources
//! whose per-second attempt rate exceeds an absolute or adaptive ceiling are
//! blocked, and released again after a cooldown.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;
