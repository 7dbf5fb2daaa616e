//! Sandbox provider: leases sandboxes to conversation threads.
//!
//! `acquire` resolves a thread to a sandbox in three layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ 1. in-process cache   (per-thread mutex)     │
//! ├─────────────────────────────────────────────┤
//! │ 2. persisted state + backend discovery       │
//! │ 3. backend create + readiness wait           │
//! │    (both under the cross-process state lock) │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Thread-bound sandbox ids are derived from the thread id, so independent
//! processes converge on the same id without talking to each other. The
//! state lock is held through creation and readiness so a second racer can
//! never create a duplicate while the first is still starting.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use fleet_core::{
    config::{SandboxConfig, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_READY_TIMEOUT_SECS},
    paths::validate_thread_id,
    traits::{SandboxBackend, SandboxStateStore},
    types::SandboxInfo,
    Error, Result,
};

use crate::file_store::FileStateStore;
use crate::local::{LocalBackendSettings, LocalContainerBackend};
use crate::mounts::MountPlanner;
use crate::remote::RemoteSandboxBackend;

/// Length of sandbox ids, in hex characters.
pub const SANDBOX_ID_LEN: usize = 8;

const DEFAULT_IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const IDLE_TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Stable sandbox id for a thread: the first 8 hex characters of its SHA-256.
pub fn deterministic_sandbox_id(thread_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(thread_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..SANDBOX_ID_LEN].to_string()
}

fn anonymous_sandbox_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..SANDBOX_ID_LEN].to_string()
}

// =============================================================================
// Handle & Options
// =============================================================================

/// Live handle to a sandbox known to this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    /// Base URL of the sandbox RPC endpoint.
    pub base_url: String,
}

impl From<&SandboxInfo> for SandboxHandle {
    fn from(info: &SandboxInfo) -> Self {
        Self {
            id: info.sandbox_id.clone(),
            base_url: info.sandbox_url.clone(),
        }
    }
}

/// Tuning knobs for [`SandboxProvider`].
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// Release sandboxes idle for longer than this. `None` disables the
    /// reclaimer entirely.
    pub idle_timeout: Option<Duration>,
    /// How often the reclaimer wakes up.
    pub idle_check_interval: Duration,
    /// Upper bound on waiting for a new sandbox to answer its health probe.
    pub ready_timeout: Duration,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            idle_check_interval: DEFAULT_IDLE_CHECK_INTERVAL,
            ready_timeout: Duration::from_secs(DEFAULT_READY_TIMEOUT_SECS),
        }
    }
}

impl From<&SandboxConfig> for ProviderOptions {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            idle_check_interval: DEFAULT_IDLE_CHECK_INTERVAL,
            ready_timeout: config.ready_timeout(),
        }
    }
}

// =============================================================================
// Provider
// =============================================================================

/// In-process bookkeeping, guarded by one mutex that is never held across
/// an `.await`.
#[derive(Default)]
struct Registry {
    sandboxes: HashMap<String, Arc<SandboxHandle>>,
    sandbox_infos: HashMap<String, SandboxInfo>,
    thread_sandboxes: HashMap<String, String>,
    thread_locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
    last_activity: HashMap<String, Instant>,
}

struct ProviderInner {
    backend: Arc<dyn SandboxBackend>,
    state_store: Arc<dyn SandboxStateStore>,
    mounts: MountPlanner,
    options: ProviderOptions,
    registry: Mutex<Registry>,
    shut_down: AtomicBool,
    idle_stop: watch::Sender<bool>,
    idle_task: Mutex<Option<JoinHandle<()>>>,
}

/// Orchestrates sandbox acquisition, lookup, release and idle reclamation.
///
/// Cheap to clone; clones share the same caches. Must be constructed inside
/// a Tokio runtime when idle reclamation is enabled.
#[derive(Clone)]
pub struct SandboxProvider {
    inner: Arc<ProviderInner>,
}

impl SandboxProvider {
    pub fn new(
        backend: Arc<dyn SandboxBackend>,
        state_store: Arc<dyn SandboxStateStore>,
        mounts: MountPlanner,
        options: ProviderOptions,
    ) -> Self {
        let (idle_stop, stop_rx) = watch::channel(false);
        let idle_timeout = options.idle_timeout.filter(|t| !t.is_zero());
        let inner = Arc::new(ProviderInner {
            backend,
            state_store,
            mounts,
            options,
            registry: Mutex::new(Registry::default()),
            shut_down: AtomicBool::new(false),
            idle_stop,
            idle_task: Mutex::new(None),
        });

        if let Some(idle_timeout) = idle_timeout {
            let task = spawn_idle_reclaimer(Arc::downgrade(&inner), stop_rx, idle_timeout);
            *inner.idle_task.lock().unwrap() = Some(task);
            tracing::info!(
                idle_timeout_secs = idle_timeout.as_secs(),
                "Started idle sandbox reclaimer"
            );
        }

        Self { inner }
    }

    /// Build a provider from configuration, selecting the backend once:
    /// remote when a provisioner URL is set, else local when auto-start is
    /// enabled, else a configuration error.
    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        let backend: Arc<dyn SandboxBackend> = if let Some(url) = config.provisioner_url() {
            tracing::info!(provisioner_url = %url, "Using remote sandbox backend");
            Arc::new(RemoteSandboxBackend::new(url)?)
        } else if config.auto_start {
            tracing::info!(image = %config.image, "Using local container backend");
            Arc::new(LocalContainerBackend::new(LocalBackendSettings::from(config))?)
        } else {
            return Err(Error::config(
                "No sandbox backend available: set provisioner_url or enable auto_start",
            ));
        };

        Ok(Self::new(
            backend,
            Arc::new(FileStateStore::from_paths(config.paths())),
            MountPlanner::from_config(config),
            ProviderOptions::from(config),
        ))
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock().unwrap()
    }

    /// Acquire a sandbox, returning its id.
    ///
    /// With a thread id the same sandbox is returned on every call until it
    /// is released, from this process or any other sharing the state store.
    /// Without one (or with an empty one) a fresh anonymous sandbox is
    /// created and never persisted.
    pub async fn acquire(&self, thread_id: Option<&str>) -> Result<String> {
        if self.is_shut_down() {
            return Err(shut_down_error());
        }
        match thread_id.filter(|id| !id.is_empty()) {
            Some(thread_id) => self.acquire_for_thread(thread_id).await,
            None => self.acquire_anonymous().await,
        }
    }

    async fn acquire_for_thread(&self, thread_id: &str) -> Result<String> {
        validate_thread_id(thread_id)?;

        let thread_lock = self.thread_lock(thread_id);
        let _thread_guard = thread_lock.lock().await;

        if let Some(sandbox_id) = self.cached_for_thread(thread_id) {
            return Ok(sandbox_id);
        }

        let sandbox_id = deterministic_sandbox_id(thread_id);
        let _state_guard = self.inner.state_store.lock(thread_id).await?;

        if let Some(info) = self.try_recover(thread_id).await {
            let sandbox_id = info.sandbox_id.clone();
            // A recovered sandbox may belong to another process; leave it running.
            self.register(Some(thread_id), info)?;
            return Ok(sandbox_id);
        }

        let info = self.create_sandbox(Some(thread_id), &sandbox_id).await?;
        if let Err(e) = self.inner.state_store.save(thread_id, &info).await {
            tracing::warn!(
                thread_id = %thread_id,
                sandbox_id = %sandbox_id,
                error = %e,
                "Failed to persist sandbox state"
            );
        }
        if let Err(e) = self.register(Some(thread_id), info.clone()) {
            self.inner.state_store.remove(thread_id).await;
            self.discard(&info).await;
            return Err(e);
        }
        Ok(sandbox_id)
    }

    async fn acquire_anonymous(&self) -> Result<String> {
        let sandbox_id = anonymous_sandbox_id();
        let info = self.create_sandbox(None, &sandbox_id).await?;
        if let Err(e) = self.register(None, info.clone()) {
            self.discard(&info).await;
            return Err(e);
        }
        Ok(sandbox_id)
    }

    /// Tear down a sandbox that finished creating after shutdown began.
    async fn discard(&self, info: &SandboxInfo) {
        tracing::info!(
            sandbox_id = %info.sandbox_id,
            "Provider shut down during acquire, destroying sandbox"
        );
        if let Err(e) = self.inner.backend.destroy(info).await {
            tracing::warn!(
                sandbox_id = %info.sandbox_id,
                error = %e,
                "Failed to destroy sandbox created during shutdown"
            );
        }
    }

    fn thread_lock(&self, thread_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.registry()
            .thread_locks
            .entry(thread_id.to_string())
            .or_default()
            .clone()
    }

    fn cached_for_thread(&self, thread_id: &str) -> Option<String> {
        let mut registry = self.registry();
        let sandbox_id = registry.thread_sandboxes.get(thread_id)?.clone();
        if registry.sandboxes.contains_key(&sandbox_id) {
            registry
                .last_activity
                .insert(sandbox_id.clone(), Instant::now());
            Some(sandbox_id)
        } else {
            registry.thread_sandboxes.remove(thread_id);
            None
        }
    }

    /// Find a sandbox recorded in the state store that the backend still
    /// has. A record the backend cannot find is dropped.
    async fn try_recover(&self, thread_id: &str) -> Option<SandboxInfo> {
        let persisted = self.inner.state_store.load(thread_id).await?;

        let Some(current) = self.inner.backend.discover(&persisted.sandbox_id).await else {
            tracing::info!(
                thread_id = %thread_id,
                sandbox_id = %persisted.sandbox_id,
                "Persisted sandbox is gone, discarding stale state"
            );
            self.inner.state_store.remove(thread_id).await;
            return None;
        };

        if current.sandbox_url != persisted.sandbox_url {
            if let Err(e) = self.inner.state_store.save(thread_id, &current).await {
                tracing::warn!(
                    thread_id = %thread_id,
                    error = %e,
                    "Failed to update sandbox state"
                );
            }
        }

        tracing::info!(
            thread_id = %thread_id,
            sandbox_id = %current.sandbox_id,
            sandbox_url = %current.sandbox_url,
            "Recovered sandbox from persisted state"
        );
        Some(current)
    }

    /// Create a sandbox and wait for it to answer. A sandbox that never
    /// becomes ready is destroyed before the error is returned.
    async fn create_sandbox(
        &self,
        thread_id: Option<&str>,
        sandbox_id: &str,
    ) -> Result<SandboxInfo> {
        let mounts = self.inner.mounts.mounts_for(thread_id).await?;
        let info = self
            .inner
            .backend
            .create(thread_id, sandbox_id, &mounts)
            .await?;

        let timeout = self.inner.options.ready_timeout;
        if !self.inner.backend.wait_until_ready(&info, timeout).await {
            tracing::error!(
                sandbox_id = %sandbox_id,
                sandbox_url = %info.sandbox_url,
                "Sandbox did not become ready"
            );
            if let Err(e) = self.inner.backend.destroy(&info).await {
                tracing::warn!(
                    sandbox_id = %sandbox_id,
                    error = %e,
                    "Failed to clean up unready sandbox"
                );
            }
            return Err(Error::ReadinessTimeout {
                sandbox_id: info.sandbox_id,
                sandbox_url: info.sandbox_url,
                timeout_secs: timeout.as_secs(),
            });
        }

        tracing::info!(
            sandbox_id = %sandbox_id,
            thread_id = ?thread_id,
            sandbox_url = %info.sandbox_url,
            "Sandbox ready"
        );
        Ok(info)
    }

    /// Cache a ready sandbox. Refused once shutdown has started, checked
    /// under the registry lock so shutdown never misses an entry.
    fn register(&self, thread_id: Option<&str>, info: SandboxInfo) -> Result<()> {
        let mut registry = self.registry();
        if self.is_shut_down() {
            return Err(shut_down_error());
        }
        let sandbox_id = info.sandbox_id.clone();
        registry
            .sandboxes
            .insert(sandbox_id.clone(), Arc::new(SandboxHandle::from(&info)));
        registry.sandbox_infos.insert(sandbox_id.clone(), info);
        if let Some(thread_id) = thread_id {
            registry
                .thread_sandboxes
                .insert(thread_id.to_string(), sandbox_id.clone());
        }
        registry.last_activity.insert(sandbox_id, Instant::now());
        Ok(())
    }

    /// Look up a sandbox this process acquired, refreshing its activity.
    pub fn get(&self, sandbox_id: &str) -> Option<Arc<SandboxHandle>> {
        let mut registry = self.registry();
        let handle = registry.sandboxes.get(sandbox_id)?.clone();
        registry
            .last_activity
            .insert(sandbox_id.to_string(), Instant::now());
        Some(handle)
    }

    /// Forget a sandbox and tear it down. Idempotent; backend failures are
    /// logged, never returned.
    pub async fn release(&self, sandbox_id: &str) {
        let (info, threads) = {
            let mut registry = self.registry();
            registry.sandboxes.remove(sandbox_id);
            registry.last_activity.remove(sandbox_id);
            let info = registry.sandbox_infos.remove(sandbox_id);
            let threads: Vec<String> = registry
                .thread_sandboxes
                .iter()
                .filter(|(_, id)| id.as_str() == sandbox_id)
                .map(|(thread_id, _)| thread_id.clone())
                .collect();
            for thread_id in &threads {
                registry.thread_sandboxes.remove(thread_id);
                if registry
                    .thread_locks
                    .get(thread_id)
                    .is_some_and(|lock| Arc::strong_count(lock) == 1)
                {
                    registry.thread_locks.remove(thread_id);
                }
            }
            (info, threads)
        };

        for thread_id in &threads {
            self.inner.state_store.remove(thread_id).await;
        }

        if let Some(info) = info {
            match self.inner.backend.destroy(&info).await {
                Ok(()) => tracing::info!(sandbox_id = %sandbox_id, "Released sandbox"),
                Err(e) => tracing::warn!(
                    sandbox_id = %sandbox_id,
                    error = %e,
                    "Failed to destroy sandbox during release"
                ),
            }
        }
    }

    /// Stop the idle reclaimer and release every sandbox this process knows.
    /// Runs at most once; later calls return immediately.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.inner.idle_stop.send(true);
        let task = self.inner.idle_task.lock().unwrap().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(IDLE_TASK_STOP_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                tracing::warn!("Idle reclaimer did not stop in time, aborting it");
                task.abort();
            }
        }

        let sandbox_ids: Vec<String> = self.registry().sandboxes.keys().cloned().collect();
        tracing::info!(count = sandbox_ids.len(), "Shutting down sandbox provider");
        for sandbox_id in sandbox_ids {
            self.release(&sandbox_id).await;
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Ids of every sandbox currently cached, sorted.
    pub fn active_sandbox_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry().sandboxes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The sandbox this process has bound to `thread_id`, if any.
    pub fn thread_sandbox(&self, thread_id: &str) -> Option<String> {
        self.registry().thread_sandboxes.get(thread_id).cloned()
    }

    async fn reclaim_idle(&self, idle_timeout: Duration) {
        let now = Instant::now();
        let idle: Vec<(String, Duration)> = self
            .registry()
            .last_activity
            .iter()
            .filter_map(|(sandbox_id, last)| {
                let idle_for = now.saturating_duration_since(*last);
                (idle_for > idle_timeout).then(|| (sandbox_id.clone(), idle_for))
            })
            .collect();

        for (sandbox_id, idle_for) in idle {
            tracing::info!(
                sandbox_id = %sandbox_id,
                idle_secs = idle_for.as_secs(),
                "Releasing idle sandbox"
            );
            self.release(&sandbox_id).await;
        }
    }
}

fn shut_down_error() -> Error {
    Error::internal("Sandbox provider is shut down")
}

fn spawn_idle_reclaimer(
    inner: Weak<ProviderInner>,
    mut stop: watch::Receiver<bool>,
    idle_timeout: Duration,
) -> JoinHandle<()> {
    let interval = inner
        .upgrade()
        .map(|inner| inner.options.idle_check_interval)
        .unwrap_or(DEFAULT_IDLE_CHECK_INTERVAL);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.changed() => break,
            }
            // The provider was dropped without a shutdown.
            let Some(inner) = inner.upgrade() else { break };
            SandboxProvider { inner }.reclaim_idle(idle_timeout).await;
        }
        tracing::debug!("Idle sandbox reclaimer stopped");
    })
}
