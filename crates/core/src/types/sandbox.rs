//! Sandbox identity and connection info.

use serde::{Deserialize, Serialize};

/// Identifies one running sandbox and how to reach its RPC endpoint.
///
/// Immutable once created. When connection details change (for example the
/// backend restarted the sandbox on a new port) a new value replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxInfo {
    pub sandbox_id: String,
    pub sandbox_url: String,
}

impl SandboxInfo {
    pub fn new(sandbox_id: impl Into<String>, sandbox_url: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            sandbox_url: sandbox_url.into(),
        }
    }
}

impl std::fmt::Display for SandboxInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.sandbox_id, self.sandbox_url)
    }
}

/// Phase reported for a sandbox whose Pod no longer exists.
pub const PHASE_NOT_FOUND: &str = "NotFound";

/// Phase of a sandbox that is serving requests.
pub const PHASE_RUNNING: &str = "Running";

/// Body of `POST /api/sandboxes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSandboxRequest {
    pub sandbox_id: String,
    /// Absent for anonymous sandboxes, which get scratch user-data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// The provisioning service's view of one sandbox.
///
/// `status` is the Pod phase as reported by the cluster (`Pending`,
/// `Running`, `Failed`, `Unknown`, or [`PHASE_NOT_FOUND`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxStatus {
    pub sandbox_id: String,
    pub sandbox_url: String,
    #[serde(default)]
    pub status: String,
}

impl SandboxStatus {
    pub fn is_running(&self) -> bool {
        self.status == PHASE_RUNNING
    }

    pub fn into_info(self) -> SandboxInfo {
        SandboxInfo::new(self.sandbox_id, self.sandbox_url)
    }
}
