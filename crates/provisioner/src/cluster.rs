//! Seam between the provisioning logic and the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};

/// Outcome of a cluster call, reduced to what the provisioner branches on.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("already exists")]
    AlreadyExists,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Api(String),
}

/// Namespaced Pod and Service operations used by the provisioner.
///
/// Implemented by [`crate::KubeCluster`] in production and by
/// [`crate::mocks::MockCluster`] in tests.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_pod(&self, pod: Pod) -> Result<(), ClusterError>;

    async fn create_service(&self, service: Service) -> Result<(), ClusterError>;

    async fn get_pod(&self, name: &str) -> Result<Pod, ClusterError>;

    async fn get_service(&self, name: &str) -> Result<Service, ClusterError>;

    async fn list_services(&self, label_selector: &str) -> Result<Vec<Service>, ClusterError>;

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError>;

    async fn delete_service(&self, name: &str) -> Result<(), ClusterError>;
}
