//! Provisioning logic: one Pod and one NodePort Service per sandbox.
//!
//! Nothing is stored locally. Every answer is read back from the cluster, so
//! the provisioner can restart at any time without losing track of sandboxes.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::{
    paths::validate_thread_id,
    readiness::retry_until,
    types::{CreateSandboxRequest, SandboxStatus, PHASE_NOT_FOUND},
    Error, Result,
};

use crate::cluster::{ClusterApi, ClusterError};
use crate::manifests;
use crate::settings::ProvisionerSettings;

const NODE_PORT_ATTEMPTS: usize = 20;
const NODE_PORT_INTERVAL: Duration = Duration::from_millis(500);

/// Turns sandbox lifecycle requests into cluster operations.
pub struct Provisioner {
    cluster: Arc<dyn ClusterApi>,
    settings: ProvisionerSettings,
    node_port_attempts: usize,
    node_port_interval: Duration,
}

impl Provisioner {
    pub fn new(cluster: Arc<dyn ClusterApi>, settings: ProvisionerSettings) -> Self {
        Self {
            cluster,
            settings,
            node_port_attempts: NODE_PORT_ATTEMPTS,
            node_port_interval: NODE_PORT_INTERVAL,
        }
    }

    /// Override how long `create` waits for the node port to be allocated.
    pub fn with_node_port_wait(mut self, attempts: usize, interval: Duration) -> Self {
        self.node_port_attempts = attempts;
        self.node_port_interval = interval;
        self
    }

    pub fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    /// Create the sandbox's Pod and Service, or return the existing one.
    pub async fn create(&self, req: &CreateSandboxRequest) -> Result<SandboxStatus> {
        let sandbox_id = req.sandbox_id.as_str();
        let thread_id = req.thread_id.as_deref().filter(|id| !id.is_empty());
        if let Some(thread_id) = thread_id {
            // Thread ids become host paths.
            validate_thread_id(thread_id)?;
        }
        tracing::info!(sandbox_id = %sandbox_id, thread_id = ?thread_id, "Creating sandbox");

        if let Some(port) = self.node_port(sandbox_id).await {
            tracing::debug!(sandbox_id = %sandbox_id, node_port = port, "Sandbox already exists");
            return Ok(self.status(sandbox_id, port).await);
        }

        let pod = manifests::build_pod(&self.settings, sandbox_id, thread_id);
        match self.cluster.create_pod(pod).await {
            Ok(()) => {
                tracing::info!(pod = %manifests::pod_name(sandbox_id), "Created Pod")
            }
            Err(ClusterError::AlreadyExists) => {}
            Err(e) => return Err(Error::cluster(format!("Pod creation failed: {}", e))),
        }

        let service = manifests::build_service(&self.settings, sandbox_id);
        match self.cluster.create_service(service).await {
            Ok(()) => {
                tracing::info!(service = %manifests::service_name(sandbox_id), "Created Service")
            }
            Err(ClusterError::AlreadyExists) => {}
            Err(e) => {
                let pod_name = manifests::pod_name(sandbox_id);
                if let Err(rollback) = self.cluster.delete_pod(&pod_name).await {
                    tracing::warn!(
                        sandbox_id = %sandbox_id,
                        error = %rollback,
                        "Failed to roll back Pod"
                    );
                }
                return Err(Error::cluster(format!("Service creation failed: {}", e)));
            }
        }

        // Node port allocation is asynchronous on the cluster side.
        let port = retry_until(self.node_port_attempts, self.node_port_interval, move || {
            self.node_port(sandbox_id)
        })
        .await
        .ok_or_else(|| Error::cluster("NodePort was not allocated in time"))?;

        Ok(self.status(sandbox_id, port).await)
    }

    /// Delete the Service and the Pod. Objects already gone are fine; other
    /// failures are collected and reported together.
    pub async fn destroy(&self, sandbox_id: &str) -> Result<()> {
        let mut errors = Vec::new();

        let service = manifests::service_name(sandbox_id);
        match self.cluster.delete_service(&service).await {
            Ok(()) => tracing::info!(service = %service, "Deleted Service"),
            Err(ClusterError::NotFound) => {}
            Err(e) => errors.push(format!("service: {}", e)),
        }

        let pod = manifests::pod_name(sandbox_id);
        match self.cluster.delete_pod(&pod).await {
            Ok(()) => tracing::info!(pod = %pod, "Deleted Pod"),
            Err(ClusterError::NotFound) => {}
            Err(e) => errors.push(format!("pod: {}", e)),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            tracing::error!(
                sandbox_id = %sandbox_id,
                errors = ?errors,
                "Sandbox cleanup incomplete"
            );
            Err(Error::PartialCleanup(errors))
        }
    }

    pub async fn get(&self, sandbox_id: &str) -> Result<SandboxStatus> {
        match self.node_port(sandbox_id).await {
            Some(port) => Ok(self.status(sandbox_id, port).await),
            None => Err(Error::not_found(format!("Sandbox '{}' not found", sandbox_id))),
        }
    }

    /// Every sandbox Service in the namespace that has a node port.
    pub async fn list(&self) -> Result<Vec<SandboxStatus>> {
        let services = self
            .cluster
            .list_services(manifests::SANDBOX_LABEL_SELECTOR)
            .await
            .map_err(|e| Error::cluster(format!("Failed to list services: {}", e)))?;

        let mut sandboxes = Vec::new();
        for service in &services {
            let (Some(sandbox_id), Some(port)) =
                (manifests::sandbox_id_of(service), manifests::node_port(service))
            else {
                continue;
            };
            sandboxes.push(self.status(sandbox_id, port).await);
        }
        Ok(sandboxes)
    }

    async fn node_port(&self, sandbox_id: &str) -> Option<u16> {
        match self
            .cluster
            .get_service(&manifests::service_name(sandbox_id))
            .await
        {
            Ok(service) => manifests::node_port(&service),
            Err(ClusterError::NotFound) => None,
            Err(e) => {
                tracing::debug!(sandbox_id = %sandbox_id, error = %e, "Failed to read Service");
                None
            }
        }
    }

    /// Pod phase, or `NotFound` when the Pod cannot be read.
    async fn pod_phase(&self, sandbox_id: &str) -> String {
        match self.cluster.get_pod(&manifests::pod_name(sandbox_id)).await {
            Ok(pod) => pod
                .status
                .and_then(|status| status.phase)
                .unwrap_or_else(|| "Unknown".to_string()),
            Err(_) => PHASE_NOT_FOUND.to_string(),
        }
    }

    async fn status(&self, sandbox_id: &str, port: u16) -> SandboxStatus {
        SandboxStatus {
            sandbox_id: sandbox_id.to_string(),
            sandbox_url: self.settings.sandbox_url(port),
            status: self.pod_phase(sandbox_id).await,
        }
    }
}
