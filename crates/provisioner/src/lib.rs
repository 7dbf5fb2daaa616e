#![deny(unused)]
//! Cluster-side provisioning service for Sandbox Fleet.
//!
//! Each sandbox id gets its own Pod and NodePort Service. Callers reach the
//! sandbox directly at `{NODE_HOST}:{node_port}`; the provisioner only
//! manages lifecycle.
//!
//! ```text
//! ┌────────────┐  HTTP  ┌─────────────┐  K8s API  ┌──────────────┐
//! │  remote    │ ─────▸ │ provisioner │ ────────▸ │  API server  │
//! │  backend   │        │   :8002     │           └──────┬───────┘
//! └─────┬──────┘        └─────────────┘                  │ creates
//!       │                                         ┌──────▼───────┐
//!       └──────────────── NodePort ─────────────▸ │ sandbox Pods │
//!                                                 └──────────────┘
//! ```

pub mod cluster;
pub mod kube_cluster;
pub mod manifests;
pub mod mocks;
pub mod server;
pub mod service;
pub mod settings;
pub mod startup;

pub use cluster::{ClusterApi, ClusterError};
pub use kube_cluster::KubeCluster;
pub use server::{build_router, serve};
pub use service::Provisioner;
pub use settings::ProvisionerSettings;
