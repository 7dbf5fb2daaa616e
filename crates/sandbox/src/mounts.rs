//! Per-sandbox bind mount planning.

use std::path::PathBuf;

use fleet_core::{
    config::SandboxConfig,
    paths::{Paths, VIRTUAL_PATH_PREFIX},
    types::Mount,
    Result,
};

/// Computes the mounts handed to `SandboxBackend::create`.
///
/// Thread-bound sandboxes get their workspace, uploads and outputs
/// directories; every sandbox gets the shared skills directory read-only
/// when it exists on the host.
#[derive(Debug, Clone)]
pub struct MountPlanner {
    paths: Paths,
    skills_path: Option<PathBuf>,
    skills_container_path: String,
}

impl MountPlanner {
    pub fn new(
        paths: Paths,
        skills_path: Option<PathBuf>,
        skills_container_path: impl Into<String>,
    ) -> Self {
        Self {
            paths,
            skills_path,
            skills_container_path: skills_container_path.into(),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(
            config.paths(),
            config.skills_path.clone(),
            config.skills_container_path.clone(),
        )
    }

    /// Mounts for a sandbox, creating the thread's directories on first use.
    pub async fn mounts_for(&self, thread_id: Option<&str>) -> Result<Vec<Mount>> {
        let mut mounts = Vec::new();

        if let Some(thread_id) = thread_id {
            mounts.extend(self.thread_mounts(thread_id).await?);
            tracing::debug!(thread_id = %thread_id, mounts = ?mounts, "Adding thread mounts");
        }

        if let Some(skills) = self.skills_mount().await {
            tracing::debug!(mount = ?skills, "Adding skills mount");
            mounts.push(skills);
        }

        Ok(mounts)
    }

    async fn thread_mounts(&self, thread_id: &str) -> Result<Vec<Mount>> {
        self.paths.ensure_thread_dirs(thread_id).await?;
        Ok(vec![
            Mount::read_write(
                self.paths.workspace_dir(thread_id)?,
                format!("{}/workspace", VIRTUAL_PATH_PREFIX),
            ),
            Mount::read_write(
                self.paths.uploads_dir(thread_id)?,
                format!("{}/uploads", VIRTUAL_PATH_PREFIX),
            ),
            Mount::read_write(
                self.paths.outputs_dir(thread_id)?,
                format!("{}/outputs", VIRTUAL_PATH_PREFIX),
            ),
        ])
    }

    async fn skills_mount(&self) -> Option<Mount> {
        let skills_path = self.skills_path.as_ref()?;
        match tokio::fs::metadata(skills_path).await {
            Ok(meta) if meta.is_dir() => Some(Mount::read_only(
                skills_path.clone(),
                self.skills_container_path.clone(),
            )),
            Ok(_) => {
                tracing::warn!(
                    path = %skills_path.display(),
                    "Skills path is not a directory, skipping mount"
                );
                None
            }
            Err(_) => None,
        }
    }
}
