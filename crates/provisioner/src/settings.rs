//! Provisioning service settings, read from the process environment.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Settings for the provisioning service.
///
/// Each field is read from the upper-cased environment variable of the same
/// name (`K8S_NAMESPACE`, `SANDBOX_IMAGE`, ...).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProvisionerSettings {
    /// Namespace holding every sandbox Pod and Service.
    pub k8s_namespace: String,
    pub sandbox_image: String,
    /// Host directory mounted read-only into every sandbox.
    pub skills_host_path: String,
    /// Host directory holding per-thread user data.
    pub threads_host_path: String,
    pub kubeconfig_path: PathBuf,
    /// Host name callers use to reach NodePort services.
    pub node_host: String,
    /// Overrides the API server address from the kubeconfig.
    pub k8s_api_server: Option<String>,
    pub provisioner_port: u16,
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            k8s_namespace: "sandbox-fleet".into(),
            sandbox_image: fleet_core::config::DEFAULT_IMAGE.into(),
            skills_host_path: "/skills".into(),
            threads_host_path: "/.sandbox-fleet/threads".into(),
            kubeconfig_path: PathBuf::from("/root/.kube/config"),
            node_host: "host.docker.internal".into(),
            k8s_api_server: None,
            provisioner_port: 8002,
        }
    }
}

impl ProvisionerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Environment::default())
    }

    /// Load from an explicit variable map instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::load(Environment::default().source(Some(vars)))
    }

    fn load(env: Environment) -> Result<Self, ConfigError> {
        let mut settings: Self = Config::builder().add_source(env).build()?.try_deserialize()?;
        settings.k8s_api_server = settings
            .k8s_api_server
            .take()
            .filter(|server| !server.trim().is_empty());
        Ok(settings)
    }

    /// URL of a sandbox published on `node_port`.
    pub fn sandbox_url(&self, node_port: u16) -> String {
        format!("http://{}:{}", self.node_host, node_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ProvisionerSettings::from_vars(HashMap::new()).unwrap();
        assert_eq!(settings.k8s_namespace, "sandbox-fleet");
        assert_eq!(settings.provisioner_port, 8002);
        assert_eq!(settings.kubeconfig_path, PathBuf::from("/root/.kube/config"));
        assert!(settings.k8s_api_server.is_none());
        assert_eq!(settings.sandbox_url(31000), "http://host.docker.internal:31000");
    }

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            ("K8S_NAMESPACE".to_string(), "sandboxes".to_string()),
            ("NODE_HOST".to_string(), "10.0.0.5".to_string()),
            ("PROVISIONER_PORT".to_string(), "9000".to_string()),
            ("K8S_API_SERVER".to_string(), "".to_string()),
        ]);
        let settings = ProvisionerSettings::from_vars(vars).unwrap();
        assert_eq!(settings.k8s_namespace, "sandboxes");
        assert_eq!(settings.provisioner_port, 9000);
        assert_eq!(settings.sandbox_url(30001), "http://10.0.0.5:30001");
        assert!(settings.k8s_api_server.is_none());
    }
}
