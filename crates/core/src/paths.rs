//! Host filesystem layout for per-thread data.
//!
//! ```text
//! {base_dir}/
//! └── threads/
//!     └── {thread_id}/
//!         ├── sandbox.json       persisted SandboxInfo
//!         ├── sandbox.lock       cross-process lock file
//!         └── user-data/         mounted at /mnt/user-data
//!             ├── workspace/
//!             ├── uploads/
//!             └── outputs/
//! ```

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Mount point of a thread's user data inside the sandbox.
pub const VIRTUAL_PATH_PREFIX: &str = "/mnt/user-data";

/// Environment variable overriding the default base directory.
pub const HOME_ENV: &str = "FLEET_HOME";

/// Resolves host paths for thread data under a base directory.
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `$FLEET_HOME`, falling back to `$HOME/.sandbox-fleet`.
    pub fn default_base_dir() -> PathBuf {
        if let Ok(home) = std::env::var(HOME_ENV) {
            if !home.is_empty() {
                return PathBuf::from(home);
            }
        }
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir())
            .join(".sandbox-fleet")
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `{base_dir}/threads/{thread_id}`, rejecting ids that could escape it.
    pub fn thread_dir(&self, thread_id: &str) -> Result<PathBuf> {
        validate_thread_id(thread_id)?;
        Ok(self.base_dir.join("threads").join(thread_id))
    }

    pub fn user_data_dir(&self, thread_id: &str) -> Result<PathBuf> {
        Ok(self.thread_dir(thread_id)?.join("user-data"))
    }

    pub fn workspace_dir(&self, thread_id: &str) -> Result<PathBuf> {
        Ok(self.user_data_dir(thread_id)?.join("workspace"))
    }

    pub fn uploads_dir(&self, thread_id: &str) -> Result<PathBuf> {
        Ok(self.user_data_dir(thread_id)?.join("uploads"))
    }

    pub fn outputs_dir(&self, thread_id: &str) -> Result<PathBuf> {
        Ok(self.user_data_dir(thread_id)?.join("outputs"))
    }

    /// Create the workspace, uploads and outputs directories for a thread.
    pub async fn ensure_thread_dirs(&self, thread_id: &str) -> Result<()> {
        for dir in [
            self.workspace_dir(thread_id)?,
            self.uploads_dir(thread_id)?,
            self.outputs_dir(thread_id)?,
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// Thread ids become directory names, so only `[A-Za-z0-9_-]+` is accepted.
pub fn validate_thread_id(thread_id: &str) -> Result<()> {
    let safe = !thread_id.is_empty()
        && thread_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        Ok(())
    } else {
        Err(Error::InvalidThreadId(thread_id.to_string()))
    }
}
