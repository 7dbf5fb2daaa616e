//! [`ClusterApi`] backed by a live cluster through `kube`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};

use fleet_core::{Error, Result};

use crate::cluster::{ClusterApi, ClusterError};
use crate::manifests;

/// Pod and Service access scoped to one namespace.
#[derive(Clone)]
pub struct KubeCluster {
    namespace: String,
    pods: Api<Pod>,
    services: Api<Service>,
    namespaces: Api<Namespace>,
}

impl KubeCluster {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            pods: Api::namespaced(client.clone(), namespace),
            services: Api::namespaced(client.clone(), namespace),
            namespaces: Api::all(client),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Create the namespace when it does not exist yet.
    pub async fn ensure_namespace(&self) -> Result<()> {
        let existing = self
            .namespaces
            .get_opt(&self.namespace)
            .await
            .map_err(|e| {
                Error::cluster(format!(
                    "Failed to read namespace {}: {}",
                    self.namespace, e
                ))
            })?;
        if existing.is_some() {
            tracing::info!(namespace = %self.namespace, "Namespace already exists");
            return Ok(());
        }

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.clone()),
                labels: Some(manifests::namespace_labels()),
                ..Default::default()
            },
            ..Default::default()
        };
        match self.namespaces.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                tracing::info!(namespace = %self.namespace, "Created namespace");
                Ok(())
            }
            Err(e) => match classify(e) {
                ClusterError::AlreadyExists => Ok(()),
                other => Err(Error::cluster(format!(
                    "Failed to create namespace {}: {}",
                    self.namespace, other
                ))),
            },
        }
    }
}

fn classify(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => ClusterError::AlreadyExists,
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound,
        kube::Error::Api(resp) => ClusterError::Api(resp.message),
        other => ClusterError::Api(other.to_string()),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_pod(&self, pod: Pod) -> std::result::Result<(), ClusterError> {
        self.pods
            .create(&PostParams::default(), &pod)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn create_service(&self, service: Service) -> std::result::Result<(), ClusterError> {
        self.services
            .create(&PostParams::default(), &service)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn get_pod(&self, name: &str) -> std::result::Result<Pod, ClusterError> {
        self.pods.get(name).await.map_err(classify)
    }

    async fn get_service(&self, name: &str) -> std::result::Result<Service, ClusterError> {
        self.services.get(name).await.map_err(classify)
    }

    async fn list_services(&self, label_selector: &str) -> std::result::Result<Vec<Service>, ClusterError> {
        self.services
            .list(&ListParams::default().labels(label_selector))
            .await
            .map(|list| list.items)
            .map_err(classify)
    }

    async fn delete_pod(&self, name: &str) -> std::result::Result<(), ClusterError> {
        self.pods
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn delete_service(&self, name: &str) -> std::result::Result<(), ClusterError> {
        self.services
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(classify)
    }
}
