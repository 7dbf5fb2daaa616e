//! Local container backend using the Docker API via `bollard`.
//!
//! Each sandbox is one container named `{prefix}-{sandbox_id}` publishing the
//! sandbox RPC port on a host port allocated from the configured base. The
//! naming convention is what lets another process (or this one, after a
//! restart) rediscover the container from the sandbox id alone.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::models::{ContainerInspectResponse, HostConfig, PortBinding};
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Mutex;

use fleet_core::{
    config::SandboxConfig,
    traits::SandboxBackend,
    types::{Mount, SandboxInfo},
    Error, Result,
};

/// Port the sandbox image listens on inside the container.
pub const CONTAINER_PORT: &str = "8080/tcp";

/// Settings for the local backend, usually taken from [`SandboxConfig`].
#[derive(Debug, Clone)]
pub struct LocalBackendSettings {
    pub image: String,
    pub base_port: u16,
    pub container_prefix: String,
    /// Static mounts applied in addition to the per-sandbox ones.
    pub mounts: Vec<Mount>,
    /// Already resolved environment for the container.
    pub environment: HashMap<String, String>,
    pub sandbox_host: String,
}

impl From<&SandboxConfig> for LocalBackendSettings {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            image: config.image.clone(),
            base_port: config.port,
            container_prefix: config.container_prefix.clone(),
            mounts: config.mounts.clone(),
            environment: config.environment.clone(),
            sandbox_host: config.sandbox_host.clone(),
        }
    }
}

// =============================================================================
// Port Allocation
// =============================================================================

/// Hands out host ports sequentially from a base, skipping ports reserved by
/// this process or already bound on the host.
#[derive(Debug)]
pub struct PortAllocator {
    base_port: u16,
    reserved: Mutex<HashMap<String, u16>>,
}

impl PortAllocator {
    pub fn new(base_port: u16) -> Self {
        Self {
            base_port,
            reserved: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve the lowest free port for `sandbox_id`.
    pub fn allocate(&self, sandbox_id: &str) -> Result<u16> {
        let mut reserved = self.reserved.lock().unwrap();
        if let Some(port) = reserved.get(sandbox_id) {
            return Ok(*port);
        }
        let port = (self.base_port..=u16::MAX)
            .filter(|port| !reserved.values().any(|p| p == port))
            .find(|port| TcpListener::bind(("0.0.0.0", *port)).is_ok())
            .ok_or_else(|| {
                Error::creation_failed(format!("No free host port at or above {}", self.base_port))
            })?;
        reserved.insert(sandbox_id.to_string(), port);
        Ok(port)
    }

    /// Record a port already in use by a rediscovered sandbox.
    pub fn reserve(&self, sandbox_id: &str, port: u16) {
        self.reserved
            .lock()
            .unwrap()
            .insert(sandbox_id.to_string(), port);
    }

    pub fn release(&self, sandbox_id: &str) {
        self.reserved.lock().unwrap().remove(sandbox_id);
    }
}

// =============================================================================
// Local Container Backend
// =============================================================================

/// Starts and stops sandbox containers on the local Docker daemon.
pub struct LocalContainerBackend {
    docker: bollard::Docker,
    settings: LocalBackendSettings,
    ports: PortAllocator,
}

impl LocalContainerBackend {
    /// Connect to the local Docker daemon.
    pub fn new(settings: LocalBackendSettings) -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            Error::config(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self::from_client(docker, settings))
    }

    /// Create from an existing bollard Docker client.
    pub fn from_client(docker: bollard::Docker, settings: LocalBackendSettings) -> Self {
        let ports = PortAllocator::new(settings.base_port);
        Self {
            docker,
            settings,
            ports,
        }
    }

    pub fn container_name(&self, sandbox_id: &str) -> String {
        format!("{}-{}", self.settings.container_prefix, sandbox_id)
    }

    fn sandbox_url(&self, port: u16) -> String {
        format!("http://{}:{}", self.settings.sandbox_host, port)
    }

    fn container_config(
        &self,
        thread_id: Option<&str>,
        sandbox_id: &str,
        port: u16,
        mounts: &[Mount],
    ) -> Config<String> {
        let binds = self
            .settings
            .mounts
            .iter()
            .chain(mounts)
            .map(Mount::bind_spec)
            .collect();
        let env = self
            .settings
            .environment
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(HashMap::from([(
                CONTAINER_PORT.to_string(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(port.to_string()),
                }]),
            )])),
            binds: Some(binds),
            // The sandbox image runs a headless browser.
            security_opt: Some(vec!["seccomp=unconfined".to_string()]),
            ..Default::default()
        };

        let mut labels = HashMap::from([
            ("managed-by".to_string(), "sandbox-fleet".to_string()),
            ("sandbox-id".to_string(), sandbox_id.to_string()),
        ]);
        if let Some(thread_id) = thread_id {
            labels.insert("thread-id".to_string(), thread_id.to_string());
        }

        Config {
            image: Some(self.settings.image.clone()),
            env: Some(env),
            exposed_ports: Some(HashMap::from([(CONTAINER_PORT.to_string(), HashMap::new())])),
            host_config: Some(host_config),
            labels: Some(labels),
            ..Default::default()
        }
    }

    async fn run_container(&self, name: &str, config: Config<String>) -> Result<()> {
        let options = CreateContainerOptions {
            name,
            platform: None,
        };

        match self
            .docker
            .create_container(Some(options.clone()), config.clone())
            .await
        {
            Ok(_) => {}
            Err(e) if status_code(&e) == Some(409) => {
                // A stopped container from an earlier run still holds the name.
                tracing::warn!(container = %name, "Replacing stale sandbox container");
                self.remove_container(name).await?;
                self.docker
                    .create_container(Some(options), config)
                    .await
                    .map_err(|e| {
                        Error::creation_failed(format!("Failed to create sandbox container: {}", e))
                    })?;
            }
            Err(e) => {
                return Err(Error::creation_failed(format!(
                    "Failed to create sandbox container: {}",
                    e
                )))
            }
        }

        if let Err(e) = self.docker.start_container::<String>(name, None).await {
            if let Err(cleanup) = self.remove_container(name).await {
                tracing::warn!(
                    container = %name,
                    error = %cleanup,
                    "Failed to remove container that did not start"
                );
            }
            return Err(Error::creation_failed(format!(
                "Failed to start sandbox container: {}",
                e
            )));
        }
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        match self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(Error::backend(format!(
                "Failed to remove sandbox container {}: {}",
                name, e
            ))),
        }
    }

    async fn inspect(&self, sandbox_id: &str) -> Option<ContainerInspectResponse> {
        let name = self.container_name(sandbox_id);
        match self
            .docker
            .inspect_container(&name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => Some(inspect),
            Err(e) => {
                if status_code(&e) != Some(404) {
                    tracing::debug!(
                        container = %name,
                        error = %e,
                        "Failed to inspect sandbox container"
                    );
                }
                None
            }
        }
    }
}

fn status_code(err: &bollard::errors::Error) -> Option<u16> {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => {
            Some(*status_code)
        }
        _ => None,
    }
}

fn is_running(inspect: &ContainerInspectResponse) -> bool {
    inspect
        .state
        .as_ref()
        .and_then(|state| state.running)
        .unwrap_or(false)
}

fn published_port(inspect: &ContainerInspectResponse) -> Option<u16> {
    inspect
        .network_settings
        .as_ref()?
        .ports
        .as_ref()?
        .get(CONTAINER_PORT)?
        .as_ref()?
        .iter()
        .find_map(|binding| binding.host_port.as_deref()?.parse().ok())
}

#[async_trait]
impl SandboxBackend for LocalContainerBackend {
    async fn create(
        &self,
        thread_id: Option<&str>,
        sandbox_id: &str,
        mounts: &[Mount],
    ) -> Result<SandboxInfo> {
        let name = self.container_name(sandbox_id);
        let port = self.ports.allocate(sandbox_id)?;
        let config = self.container_config(thread_id, sandbox_id, port, mounts);

        if let Err(e) = self.run_container(&name, config).await {
            self.ports.release(sandbox_id);
            return Err(e);
        }

        let info = SandboxInfo::new(sandbox_id, self.sandbox_url(port));
        tracing::info!(
            sandbox_id = %sandbox_id,
            container = %name,
            image = %self.settings.image,
            url = %info.sandbox_url,
            "Sandbox container started"
        );
        Ok(info)
    }

    async fn destroy(&self, info: &SandboxInfo) -> Result<()> {
        let name = self.container_name(&info.sandbox_id);

        // Stop with a short grace period; removal below is forced anyway.
        let _ = self
            .docker
            .stop_container(&name, Some(StopContainerOptions { t: 5 }))
            .await;
        let result = self.remove_container(&name).await;
        self.ports.release(&info.sandbox_id);

        if result.is_ok() {
            tracing::info!(
                sandbox_id = %info.sandbox_id,
                container = %name,
                "Sandbox container destroyed"
            );
        }
        result
    }

    async fn is_alive(&self, info: &SandboxInfo) -> bool {
        self.inspect(&info.sandbox_id)
            .await
            .map(|inspect| is_running(&inspect))
            .unwrap_or(false)
    }

    async fn discover(&self, sandbox_id: &str) -> Option<SandboxInfo> {
        let inspect = self.inspect(sandbox_id).await?;
        if !is_running(&inspect) {
            tracing::debug!(
                sandbox_id = %sandbox_id,
                "Sandbox container exists but is not running"
            );
            return None;
        }
        let port = published_port(&inspect)?;
        self.ports.reserve(sandbox_id, port);
        Some(SandboxInfo::new(sandbox_id, self.sandbox_url(port)))
    }
}
