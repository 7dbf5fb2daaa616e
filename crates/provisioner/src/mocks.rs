//! In-memory [`ClusterApi`] for tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, PodStatus, Service};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::cluster::{ClusterApi, ClusterError};
use crate::manifests;

/// Fake cluster keeping Pods and Services in maps.
///
/// New Services get a node port from 31000 upwards (or a fixed one) unless
/// port allocation is switched off.
pub struct MockCluster {
    pods: Mutex<HashMap<String, Pod>>,
    services: Mutex<HashMap<String, Service>>,
    next_node_port: AtomicU16,
    fixed_node_port: AtomicU16,
    allocate_ports: AtomicBool,
    fail_service_create: AtomicBool,
    fail_pod_delete: AtomicBool,
    pod_creates: AtomicUsize,
    service_creates: AtomicUsize,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            pods: Mutex::new(HashMap::new()),
            services: Mutex::new(HashMap::new()),
            next_node_port: AtomicU16::new(31000),
            fixed_node_port: AtomicU16::new(0),
            allocate_ports: AtomicBool::new(true),
            fail_service_create: AtomicBool::new(false),
            fail_pod_delete: AtomicBool::new(false),
            pod_creates: AtomicUsize::new(0),
            service_creates: AtomicUsize::new(0),
        }
    }

    /// Give every new Service the same node port.
    pub fn with_fixed_node_port(self, port: u16) -> Self {
        self.fixed_node_port.store(port, Ordering::SeqCst);
        self
    }

    /// Insert a Service directly, bypassing `create_service`.
    pub fn insert_service(&self, service: Service) {
        let name = service.metadata.name.clone().unwrap_or_default();
        self.services.lock().unwrap().insert(name, service);
    }

    pub fn set_pod_phase(&self, pod_name: &str, phase: &str) {
        if let Some(pod) = self.pods.lock().unwrap().get_mut(pod_name) {
            pod.status = Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            });
        }
    }

    pub fn set_allocate_ports(&self, allocate: bool) {
        self.allocate_ports.store(allocate, Ordering::SeqCst);
    }

    pub fn set_fail_service_create(&self, fail: bool) {
        self.fail_service_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_pod_delete(&self, fail: bool) {
        self.fail_pod_delete.store(fail, Ordering::SeqCst);
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.pods.lock().unwrap().get(name).cloned()
    }

    pub fn has_pod(&self, name: &str) -> bool {
        self.pods.lock().unwrap().contains_key(name)
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.lock().unwrap().contains_key(name)
    }

    pub fn pod_create_count(&self) -> usize {
        self.pod_creates.load(Ordering::SeqCst)
    }

    pub fn service_create_count(&self) -> usize {
        self.service_creates.load(Ordering::SeqCst)
    }
}

fn object_name(meta_name: &Option<String>) -> Result<String, ClusterError> {
    meta_name
        .clone()
        .ok_or_else(|| ClusterError::Api("object has no name".to_string()))
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn create_pod(&self, pod: Pod) -> Result<(), ClusterError> {
        self.pod_creates.fetch_add(1, Ordering::SeqCst);
        let name = object_name(&pod.metadata.name)?;
        let mut pods = self.pods.lock().unwrap();
        if pods.contains_key(&name) {
            return Err(ClusterError::AlreadyExists);
        }
        pods.insert(name, pod);
        Ok(())
    }

    async fn create_service(&self, mut service: Service) -> Result<(), ClusterError> {
        self.service_creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_service_create.load(Ordering::SeqCst) {
            return Err(ClusterError::Api("quota exceeded".to_string()));
        }
        let name = object_name(&service.metadata.name)?;
        let mut services = self.services.lock().unwrap();
        if services.contains_key(&name) {
            return Err(ClusterError::AlreadyExists);
        }
        if self.allocate_ports.load(Ordering::SeqCst) {
            let port = match self.fixed_node_port.load(Ordering::SeqCst) {
                0 => self.next_node_port.fetch_add(1, Ordering::SeqCst),
                fixed => fixed,
            };
            manifests::assign_node_port(&mut service, port);
        }
        services.insert(name, service);
        Ok(())
    }

    async fn get_pod(&self, name: &str) -> Result<Pod, ClusterError> {
        self.pod(name).ok_or(ClusterError::NotFound)
    }

    async fn get_service(&self, name: &str) -> Result<Service, ClusterError> {
        self.services
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or(ClusterError::NotFound)
    }

    async fn list_services(&self, label_selector: &str) -> Result<Vec<Service>, ClusterError> {
        let (key, value) = label_selector
            .split_once('=')
            .ok_or_else(|| ClusterError::Api(format!("bad selector {}", label_selector)))?;
        let mut services: Vec<Service> = self
            .services
            .lock()
            .unwrap()
            .values()
            .filter(|svc| {
                svc.metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(key))
                    .is_some_and(|v| v == value)
            })
            .cloned()
            .collect();
        services.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(services)
    }

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError> {
        if self.fail_pod_delete.load(Ordering::SeqCst) {
            return Err(ClusterError::Api("forbidden".to_string()));
        }
        self.pods
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or(ClusterError::NotFound)
    }

    async fn delete_service(&self, name: &str) -> Result<(), ClusterError> {
        self.services
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or(ClusterError::NotFound)
    }
}
