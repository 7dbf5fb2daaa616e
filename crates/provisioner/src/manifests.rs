//! Pod and Service manifests for one sandbox.

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, HTTPGetAction, HostPathVolumeSource, Pod,
    PodSpec, Probe, ResourceRequirements, SecurityContext, Service, ServicePort, ServiceSpec,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use fleet_core::config::DEFAULT_SKILLS_CONTAINER_PATH;
use fleet_core::paths::VIRTUAL_PATH_PREFIX;
use fleet_core::readiness::READY_PROBE_PATH;

use crate::settings::ProvisionerSettings;

/// Label shared by every sandbox object.
pub const SANDBOX_APP_LABEL: &str = "sandbox-fleet-sandbox";
/// Label carrying the sandbox id; the Service selects its Pod by it.
pub const SANDBOX_ID_LABEL: &str = "sandbox-id";
/// Selector matching every sandbox Service.
pub const SANDBOX_LABEL_SELECTOR: &str = "app=sandbox-fleet-sandbox";

const SANDBOX_PORT: i32 = 8080;
const PORT_NAME: &str = "http";

pub fn pod_name(sandbox_id: &str) -> String {
    format!("sandbox-{}", sandbox_id)
}

pub fn service_name(sandbox_id: &str) -> String {
    format!("sandbox-{}-svc", sandbox_id)
}

pub fn namespace_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "sandbox-fleet".to_string()),
        ("app.kubernetes.io/component".to_string(), "sandbox".to_string()),
    ])
}

fn sandbox_labels(sandbox_id: &str) -> BTreeMap<String, String> {
    let mut labels = namespace_labels();
    labels.insert("app".to_string(), SANDBOX_APP_LABEL.to_string());
    labels.insert(SANDBOX_ID_LABEL.to_string(), sandbox_id.to_string());
    labels
}

fn metadata(name: String, sandbox_id: &str, settings: &ProvisionerSettings) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(settings.k8s_namespace.clone()),
        labels: Some(sandbox_labels(sandbox_id)),
        ..Default::default()
    }
}

fn http_probe(initial_delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(READY_PROBE_PATH.to_string()),
            port: IntOrString::Int(SANDBOX_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(3),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn quantities(cpu: &str, memory: &str, storage: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
        ("ephemeral-storage".to_string(), Quantity(storage.to_string())),
    ])
}

fn host_path_volume(name: &str, path: String, kind: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path,
            type_: Some(kind.to_string()),
        }),
        ..Default::default()
    }
}

/// Pod running the sandbox image.
///
/// Thread-bound sandboxes mount the thread's user-data directory from the
/// host; anonymous ones get an `emptyDir` instead.
pub fn build_pod(settings: &ProvisionerSettings, sandbox_id: &str, thread_id: Option<&str>) -> Pod {
    let user_data = match thread_id {
        Some(thread_id) => host_path_volume(
            "user-data",
            format!("{}/{}/user-data", settings.threads_host_path, thread_id),
            "DirectoryOrCreate",
        ),
        None => Volume {
            name: "user-data".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    };

    let container = Container {
        name: "sandbox".to_string(),
        image: Some(settings.sandbox_image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![ContainerPort {
            name: Some(PORT_NAME.to_string()),
            container_port: SANDBOX_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(http_probe(5, 5)),
        liveness_probe: Some(http_probe(10, 10)),
        resources: Some(ResourceRequirements {
            requests: Some(quantities("100m", "256Mi", "500Mi")),
            limits: Some(quantities("1000m", "1Gi", "500Mi")),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "skills".to_string(),
                mount_path: DEFAULT_SKILLS_CONTAINER_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "user-data".to_string(),
                mount_path: VIRTUAL_PATH_PREFIX.to_string(),
                read_only: Some(false),
                ..Default::default()
            },
        ]),
        security_context: Some(SecurityContext {
            privileged: Some(false),
            allow_privilege_escalation: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };

    Pod {
        metadata: metadata(pod_name(sandbox_id), sandbox_id, settings),
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: Some(vec![
                host_path_volume("skills", settings.skills_host_path.clone(), "Directory"),
                user_data,
            ]),
            restart_policy: Some("Always".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// NodePort Service in front of the sandbox Pod. The node port is left for
/// the cluster to allocate.
pub fn build_service(settings: &ProvisionerSettings, sandbox_id: &str) -> Service {
    Service {
        metadata: metadata(service_name(sandbox_id), sandbox_id, settings),
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: SANDBOX_PORT,
                target_port: Some(IntOrString::Int(SANDBOX_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            selector: Some(BTreeMap::from([(
                SANDBOX_ID_LABEL.to_string(),
                sandbox_id.to_string(),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The allocated node port of the Service's `http` port, if any yet.
pub fn node_port(service: &Service) -> Option<u16> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|port| port.name.as_deref() == Some(PORT_NAME))?
        .node_port
        .and_then(|port| u16::try_from(port).ok())
        .filter(|port| *port > 0)
}

/// Sandbox id a Service was created for.
pub fn sandbox_id_of(service: &Service) -> Option<&str> {
    service
        .metadata
        .labels
        .as_ref()?
        .get(SANDBOX_ID_LABEL)
        .map(String::as_str)
}

/// Set the node port on a Service's `http` port, as the cluster would.
pub fn assign_node_port(service: &mut Service, port: u16) {
    let ports = service
        .spec
        .get_or_insert_with(Default::default)
        .ports
        .get_or_insert_with(Vec::new);
    for service_port in ports.iter_mut().filter(|p| p.name.as_deref() == Some(PORT_NAME)) {
        service_port.node_port = Some(i32::from(port));
    }
}
