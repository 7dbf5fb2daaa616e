//! Core traits for Sandbox Fleet.
//!
//! - `backend`: how sandboxes are provisioned (local container vs. remote cluster)
//! - `state_store`: how thread → sandbox mappings are persisted and locked

pub mod backend;
pub mod state_store;

pub use backend::*;
pub use state_store::*;
