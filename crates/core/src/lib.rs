#![deny(unused)]
//! Core types, traits, and error definitions for Sandbox Fleet.
//!
//! This crate provides the building blocks shared by the sandbox provider,
//! its backends and the cluster-side provisioning service.

pub mod config;
pub mod error;
pub mod mocks;
pub mod paths;
pub mod readiness;
pub mod telemetry;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
