//! Core type definitions for Sandbox Fleet.

pub mod mount;
pub mod sandbox;

pub use mount::*;
pub use sandbox::*;
