//! Sandbox provider configuration.

use config::{Config, ConfigError, Environment, File, Source};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::Paths;
use crate::types::Mount;

pub const DEFAULT_IMAGE: &str = "sandbox-fleet/aio-sandbox:latest";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CONTAINER_PREFIX: &str = "fleet-sandbox";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SKILLS_CONTAINER_PATH: &str = "/mnt/skills";

/// Settings consumed by the sandbox provider and its backends.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container image for locally started sandboxes.
    pub image: String,
    /// First host port tried when publishing a local sandbox.
    pub port: u16,
    /// Local container names are `{container_prefix}-{sandbox_id}`.
    pub container_prefix: String,
    /// Release sandboxes idle for longer than this. `0` disables reclamation.
    pub idle_timeout_secs: u64,
    /// Start local containers when no provisioner is configured.
    pub auto_start: bool,
    /// Extra bind mounts applied to every local sandbox.
    pub mounts: Vec<Mount>,
    /// Environment passed to local sandboxes. `$NAME` values are resolved
    /// from the process environment by [`SandboxConfig::load_from`].
    pub environment: HashMap<String, String>,
    /// Provisioning service base URL. Selects the remote backend when set.
    pub provisioner_url: Option<String>,
    /// Root for thread data and persisted state.
    pub base_dir: Option<PathBuf>,
    /// Host skills directory, mounted read-only when it exists.
    pub skills_path: Option<PathBuf>,
    pub skills_container_path: String,
    /// Host name used to build URLs of local sandboxes.
    pub sandbox_host: String,
    pub ready_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.into(),
            port: DEFAULT_PORT,
            container_prefix: DEFAULT_CONTAINER_PREFIX.into(),
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            auto_start: true,
            mounts: Vec::new(),
            environment: HashMap::new(),
            provisioner_url: None,
            base_dir: None,
            skills_path: None,
            skills_container_path: DEFAULT_SKILLS_CONTAINER_PATH.into(),
            sandbox_host: "localhost".into(),
            ready_timeout_secs: DEFAULT_READY_TIMEOUT_SECS,
        }
    }
}

impl SandboxConfig {
    /// Load `config/sandbox.{yaml,toml,json}` (optional) overlaid with
    /// `FLEET__*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_file(File::with_name("config/sandbox").required(false))
    }

    /// Load from an explicit file, still honouring `FLEET__*` overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file(File::from(path.as_ref()).required(false))
    }

    fn from_file<S>(file: S) -> Result<Self, ConfigError>
    where
        S: Source + Clone + Send + Sync + 'static,
    {
        let env_keys = environment_keys(&file)?;
        let s = Config::builder()
            .add_source(file)
            // Map FLEET__IDLE_TIMEOUT_SECS=60 to idle_timeout_secs
            .add_source(Environment::with_prefix("FLEET").separator("__"))
            .build()?;

        let mut cfg: Self = s.try_deserialize()?;
        let environment = restore_key_case(std::mem::take(&mut cfg.environment), &env_keys);
        cfg.environment = resolve_env_vars(&environment);
        Ok(cfg)
    }

    /// `None` when idle reclamation is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// The remote backend is used when this returns `Some`.
    pub fn provisioner_url(&self) -> Option<&str> {
        self.provisioner_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn paths(&self) -> Paths {
        Paths::new(self.base_dir.clone().unwrap_or_else(Paths::default_base_dir))
    }
}

/// Keys of the file's `environment` table as written.
fn environment_keys<S: Source>(file: &S) -> Result<Vec<String>, ConfigError> {
    match file.collect()?.remove("environment") {
        Some(table) => Ok(table
            .into_table()
            .map(|table| table.into_iter().map(|(key, _)| key).collect())
            .unwrap_or_default()),
        None => Ok(Vec::new()),
    }
}

/// The merged config lowercases map keys, but variable names are
/// case-sensitive. Put back the spelling used in the file.
fn restore_key_case(
    mut environment: HashMap<String, String>,
    file_keys: &[String],
) -> HashMap<String, String> {
    for key in file_keys {
        if let Some(value) = environment.remove(&key.to_lowercase()) {
            environment.insert(key.clone(), value);
        }
    }
    environment
}

/// Resolve `$NAME` references against the process environment.
///
/// Unset variables resolve to an empty string; other values pass through.
pub fn resolve_env_vars(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.iter()
        .map(|(key, value)| {
            let resolved = match value.strip_prefix('$') {
                Some(name) => std::env::var(name).unwrap_or_default(),
                None => value.clone(),
            };
            (key.clone(), resolved)
        })
        .collect()
}
