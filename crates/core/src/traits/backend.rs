//! Sandbox backend trait.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::readiness;
use crate::types::{Mount, SandboxInfo};

/// Strategy for provisioning, destroying and discovering sandboxes.
///
/// Implementations are selected once at construction time; nothing else in
/// the system branches on which backend is in use.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Provision a sandbox with the given id and return its connection info.
    ///
    /// Failure aborts the caller's acquire.
    async fn create(
        &self,
        thread_id: Option<&str>,
        sandbox_id: &str,
        mounts: &[Mount],
    ) -> Result<SandboxInfo>;

    /// Tear down the sandbox. Must tolerate resources that are already gone.
    async fn destroy(&self, info: &SandboxInfo) -> Result<()>;

    /// Whether the sandbox is currently running.
    async fn is_alive(&self, info: &SandboxInfo) -> bool;

    /// Look up a previously created sandbox, returning its current connection
    /// info, or `None` when it cannot be recovered.
    async fn discover(&self, sandbox_id: &str) -> Option<SandboxInfo>;

    /// Wait until the sandbox answers its health probe.
    async fn wait_until_ready(&self, info: &SandboxInfo, timeout: Duration) -> bool {
        readiness::wait_for_sandbox_ready(&info.sandbox_url, timeout).await
    }
}
