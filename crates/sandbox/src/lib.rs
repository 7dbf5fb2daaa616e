#![deny(unused)]
//! Sandbox lifecycle management for Sandbox Fleet.
//!
//! Leases isolated sandboxes to conversation threads, guaranteeing at most
//! one sandbox per thread across every process that shares a state store.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  Caller (agent runtime, CLI)           │
//! │    ↓ acquire / get / release           │
//! ├────────────────────────────────────────┤
//! │  SandboxProvider                       │
//! │    in-process caches + idle reclaimer  │
//! │    ↓ lock / load / save                │
//! ├────────────────────────────────────────┤
//! │  FileStateStore (JSON + flock)         │
//! ├────────────────────────────────────────┤
//! │  SandboxBackend (chosen once)          │
//! │    LocalContainerBackend  → Docker     │
//! │    RemoteSandboxBackend   → provisioner│
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use fleet_sandbox::{SandboxProvider, ShutdownHooks};
//!
//! let config = SandboxConfig::load()?;
//! let provider = SandboxProvider::from_config(&config)?;
//! let hooks = ShutdownHooks::new();
//! hooks.register_provider(provider.clone());
//!
//! let sandbox_id = provider.acquire(Some("thread-42")).await?;
//! let handle = provider.get(&sandbox_id).expect("just acquired");
//! ```

pub mod file_store;
pub mod local;
pub mod mounts;
pub mod provider;
pub mod remote;
pub mod shutdown;

pub use file_store::FileStateStore;
pub use local::{LocalBackendSettings, LocalContainerBackend};
pub use mounts::MountPlanner;
pub use provider::{deterministic_sandbox_id, ProviderOptions, SandboxHandle, SandboxProvider};
pub use remote::RemoteSandboxBackend;
pub use shutdown::ShutdownHooks;
