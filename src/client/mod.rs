//! Client-side helpers for Rust consumers of the real-time API.

pub mod reconciler;

pub use reconciler::{LocalMessage, MessageKey, Reconciler};
