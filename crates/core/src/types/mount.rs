//! Bind mount descriptions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A bind mount from the host into a sandbox container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

impl Mount {
    pub fn read_write(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    pub fn read_only(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: true,
        }
    }

    /// Docker `--volume` style bind spec: `host:container[:ro]`.
    pub fn bind_spec(&self) -> String {
        let mut spec = format!("{}:{}", self.host_path.display(), self.container_path);
        if self.read_only {
            spec.push_str(":ro");
        }
        spec
    }
}
