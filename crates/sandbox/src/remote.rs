//! Remote sandbox backend: delegates Pod lifecycle to the provisioning service.
//!
//! ```text
//! ┌────────────┐  HTTP   ┌─────────────┐  K8s API  ┌──────────┐
//! │  provider  │ ──────▸ │ provisioner │ ────────▸ │ cluster  │
//! │  (remote)  │         │             │           │          │
//! └─────┬──────┘         └─────────────┘           └────┬─────┘
//!       │                                               │ creates
//!       │                direct NodePort          ┌─────▼──────┐
//!       └───────────────────────────────────────▸ │ sandbox Pod│
//!                                                 └────────────┘
//! ```

use async_trait::async_trait;
use std::time::Duration;

use fleet_core::{
    traits::SandboxBackend,
    types::{CreateSandboxRequest, Mount, SandboxInfo, SandboxStatus},
    Error, Result,
};

const CREATE_TIMEOUT: Duration = Duration::from_secs(30);
const DESTROY_TIMEOUT: Duration = Duration::from_secs(15);
const GET_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin, stateless HTTP client for the provisioning service.
pub struct RemoteSandboxBackend {
    client: reqwest::Client,
    provisioner_url: String,
}

impl RemoteSandboxBackend {
    pub fn new(provisioner_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, provisioner_url))
    }

    pub fn with_client(client: reqwest::Client, provisioner_url: &str) -> Self {
        Self {
            client,
            provisioner_url: provisioner_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn provisioner_url(&self) -> &str {
        &self.provisioner_url
    }

    fn sandbox_endpoint(&self, sandbox_id: &str) -> String {
        format!("{}/api/sandboxes/{}", self.provisioner_url, sandbox_id)
    }

    async fn fetch(&self, sandbox_id: &str) -> Result<Option<SandboxStatus>> {
        let resp = self
            .client
            .get(self.sandbox_endpoint(sandbox_id))
            .timeout(GET_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::backend(format!("Provisioner get failed: {}", e)))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| Error::backend(format!("Provisioner get failed: {}", e)))?;
        let body = resp
            .json::<SandboxStatus>()
            .await
            .map_err(|e| Error::backend(format!("Invalid provisioner response: {}", e)))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl SandboxBackend for RemoteSandboxBackend {
    async fn create(
        &self,
        thread_id: Option<&str>,
        sandbox_id: &str,
        _mounts: &[Mount],
    ) -> Result<SandboxInfo> {
        // Mounts are decided cluster-side from the thread id.
        let request = CreateSandboxRequest {
            sandbox_id: sandbox_id.to_string(),
            thread_id: thread_id.map(str::to_string),
        };
        let result: std::result::Result<SandboxStatus, reqwest::Error> = async {
            let resp = self
                .client
                .post(format!("{}/api/sandboxes", self.provisioner_url))
                .json(&request)
                .timeout(CREATE_TIMEOUT)
                .send()
                .await?
                .error_for_status()?;
            resp.json::<SandboxStatus>().await
        }
        .await;

        match result {
            Ok(body) => {
                tracing::info!(
                    sandbox_id = %sandbox_id,
                    sandbox_url = %body.sandbox_url,
                    status = %body.status,
                    "Provisioner created sandbox"
                );
                Ok(SandboxInfo::new(sandbox_id, body.sandbox_url))
            }
            Err(e) => {
                tracing::error!(sandbox_id = %sandbox_id, error = %e, "Provisioner create failed");
                Err(Error::creation_failed(format!("Provisioner create failed: {}", e)))
            }
        }
    }

    async fn destroy(&self, info: &SandboxInfo) -> Result<()> {
        let resp = self
            .client
            .delete(self.sandbox_endpoint(&info.sandbox_id))
            .timeout(DESTROY_TIMEOUT)
            .send()
            .await;

        match resp {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(sandbox_id = %info.sandbox_id, "Provisioner destroyed sandbox");
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::warn!(
                    sandbox_id = %info.sandbox_id,
                    status = %status,
                    body = %body,
                    "Provisioner destroy returned an error"
                );
            }
            Err(e) => {
                tracing::warn!(
                    sandbox_id = %info.sandbox_id,
                    error = %e,
                    "Provisioner destroy failed"
                );
            }
        }
        Ok(())
    }

    async fn is_alive(&self, info: &SandboxInfo) -> bool {
        matches!(
            self.fetch(&info.sandbox_id).await,
            Ok(Some(body)) if body.is_running()
        )
    }

    async fn discover(&self, sandbox_id: &str) -> Option<SandboxInfo> {
        match self.fetch(sandbox_id).await {
            Ok(Some(body)) => Some(SandboxInfo::new(sandbox_id, body.sandbox_url)),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(
                    sandbox_id = %sandbox_id,
                    error = %e,
                    "Provisioner discover failed"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let backend = RemoteSandboxBackend::new("http://provisioner:8002/").unwrap();
        assert_eq!(backend.provisioner_url(), "http://provisioner:8002");
        assert_eq!(
            backend.sandbox_endpoint("ab12cd34"),
            "http://provisioner:8002/api/sandboxes/ab12cd34"
        );
    }
}
