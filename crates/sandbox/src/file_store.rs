//! File-based sandbox state store.
//!
//! State lives at `{base_dir}/threads/{thread_id}/sandbox.json`, guarded by an
//! advisory `flock` on the sibling `sandbox.lock`. Works for any processes that
//! share the filesystem: one host, or several pods on a shared volume.

use async_trait::async_trait;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use fleet_core::{
    paths::Paths,
    traits::{SandboxStateStore, StateLock},
    types::SandboxInfo,
    Error, Result,
};

pub const SANDBOX_STATE_FILE: &str = "sandbox.json";
pub const SANDBOX_LOCK_FILE: &str = "sandbox.lock";

/// State store using JSON files and `flock` locking.
pub struct FileStateStore {
    paths: Paths,
}

impl FileStateStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: Paths::new(base_dir),
        }
    }

    pub fn from_paths(paths: Paths) -> Self {
        Self { paths }
    }

    fn state_file(&self, thread_id: &str) -> Result<PathBuf> {
        Ok(self.paths.thread_dir(thread_id)?.join(SANDBOX_STATE_FILE))
    }
}

#[async_trait]
impl SandboxStateStore for FileStateStore {
    async fn save(&self, thread_id: &str, info: &SandboxInfo) -> Result<()> {
        let thread_dir = self.paths.thread_dir(thread_id)?;
        tokio::fs::create_dir_all(&thread_dir).await.map_err(|e| {
            Error::storage(format!(
                "Failed to create state directory {}: {}",
                thread_dir.display(),
                e
            ))
        })?;

        let state_file = thread_dir.join(SANDBOX_STATE_FILE);
        let tmp_file = thread_dir.join(format!("{}.tmp", SANDBOX_STATE_FILE));
        let content = serde_json::to_vec(info)?;
        tokio::fs::write(&tmp_file, content)
            .await
            .map_err(|e| Error::storage(format!("Failed to write sandbox state: {}", e)))?;
        tokio::fs::rename(&tmp_file, &state_file)
            .await
            .map_err(|e| Error::storage(format!("Failed to replace sandbox state: {}", e)))?;

        tracing::info!(
            thread_id = %thread_id,
            sandbox_id = %info.sandbox_id,
            "Saved sandbox state"
        );
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Option<SandboxInfo> {
        let state_file = match self.state_file(thread_id) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(
                    thread_id = %thread_id,
                    error = %e,
                    "Cannot resolve sandbox state path"
                );
                return None;
            }
        };

        let content = match tokio::fs::read(&state_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(thread_id = %thread_id, error = %e, "Failed to read sandbox state");
                return None;
            }
        };

        match serde_json::from_slice::<SandboxInfo>(&content) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(
                    thread_id = %thread_id,
                    error = %e,
                    "Ignoring corrupt sandbox state"
                );
                None
            }
        }
    }

    async fn remove(&self, thread_id: &str) {
        let Ok(state_file) = self.state_file(thread_id) else {
            return;
        };
        match tokio::fs::remove_file(&state_file).await {
            Ok(()) => tracing::info!(thread_id = %thread_id, "Removed sandbox state"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(thread_id = %thread_id, error = %e, "Failed to remove sandbox state")
            }
        }
    }

    async fn lock(&self, thread_id: &str) -> Result<StateLock> {
        let thread_dir = self.paths.thread_dir(thread_id)?;
        tokio::fs::create_dir_all(&thread_dir).await?;
        let lock_path = thread_dir.join(SANDBOX_LOCK_FILE);

        // flock blocks the calling thread until the holder releases it.
        let flock = tokio::task::spawn_blocking(move || -> Result<Flock<File>> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
                Error::storage(format!("Failed to lock {}: {}", lock_path.display(), errno))
            })
        })
        .await
        .map_err(|e| Error::internal(format!("Lock task failed: {}", e)))??;

        Ok(StateLock::new(flock))
    }
}
