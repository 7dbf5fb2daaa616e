//! Mock implementations of core traits for testing.
//!
//! `MockBackend` stands in for a container runtime or cluster and records how
//! often each capability was invoked; `InMemoryStateStore` stands in for the
//! shared filesystem. Sharing one instance of each between several providers
//! simulates several processes on the same host.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    traits::{SandboxBackend, SandboxStateStore, StateLock},
    types::{Mount, SandboxInfo},
    Error, Result,
};

// =============================================================================
// Mock Backend
// =============================================================================

/// In-memory sandbox backend with call counters.
pub struct MockBackend {
    running: Mutex<HashMap<String, SandboxInfo>>,
    destroyed: Mutex<Vec<String>>,
    last_mounts: Mutex<Vec<Mount>>,
    create_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    discover_calls: AtomicUsize,
    next_port: AtomicUsize,
    ready: AtomicBool,
    fail_create: AtomicBool,
    create_delay: Option<Duration>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(HashMap::new()),
            destroyed: Mutex::new(Vec::new()),
            last_mounts: Mutex::new(Vec::new()),
            create_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            discover_calls: AtomicUsize::new(0),
            next_port: AtomicUsize::new(30000),
            ready: AtomicBool::new(true),
            fail_create: AtomicBool::new(false),
            create_delay: None,
        }
    }

    /// Make every `create` take at least `delay`, widening race windows.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Whether newly created sandboxes pass their readiness probe.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Drop a sandbox without going through `destroy`, as if it crashed or
    /// was deleted by hand.
    pub fn forget(&self, sandbox_id: &str) {
        self.running.lock().unwrap().remove(sandbox_id);
    }

    /// Pretend the backend restarted a sandbox on a different URL.
    pub fn move_to(&self, sandbox_id: &str, sandbox_url: &str) {
        self.running
            .lock()
            .unwrap()
            .insert(sandbox_id.to_string(), SandboxInfo::new(sandbox_id, sandbox_url));
    }

    pub fn create_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn discover_count(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub fn is_running(&self, sandbox_id: &str) -> bool {
        self.running.lock().unwrap().contains_key(sandbox_id)
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    pub fn destroyed_ids(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }

    /// Mounts passed to the most recent `create`.
    pub fn last_mounts(&self) -> Vec<Mount> {
        self.last_mounts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxBackend for MockBackend {
    async fn create(
        &self,
        _thread_id: Option<&str>,
        sandbox_id: &str,
        mounts: &[Mount],
    ) -> Result<SandboxInfo> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::backend(format!("mock create rejected {}", sandbox_id)));
        }
        *self.last_mounts.lock().unwrap() = mounts.to_vec();

        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        let info = SandboxInfo::new(sandbox_id, format!("http://mock-sandbox:{}", port));
        self.running
            .lock()
            .unwrap()
            .insert(sandbox_id.to_string(), info.clone());
        Ok(info)
    }

    async fn destroy(&self, info: &SandboxInfo) -> Result<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.running.lock().unwrap().remove(&info.sandbox_id);
        self.destroyed.lock().unwrap().push(info.sandbox_id.clone());
        Ok(())
    }

    async fn is_alive(&self, info: &SandboxInfo) -> bool {
        self.is_running(&info.sandbox_id)
    }

    async fn discover(&self, sandbox_id: &str) -> Option<SandboxInfo> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        self.running.lock().unwrap().get(sandbox_id).cloned()
    }

    async fn wait_until_ready(&self, _info: &SandboxInfo, _timeout: Duration) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

// =============================================================================
// In-Memory State Store
// =============================================================================

/// State store backed by a map, with per-thread async locks.
#[derive(Default)]
pub struct InMemoryStateStore {
    records: Mutex<HashMap<String, SandboxInfo>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, thread_id: &str) -> Option<SandboxInfo> {
        self.records.lock().unwrap().get(thread_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SandboxStateStore for InMemoryStateStore {
    async fn save(&self, thread_id: &str, info: &SandboxInfo) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), info.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Option<SandboxInfo> {
        self.get(thread_id)
    }

    async fn remove(&self, thread_id: &str) {
        self.records.lock().unwrap().remove(thread_id);
    }

    async fn lock(&self, thread_id: &str) -> Result<StateLock> {
        let lock = self
            .locks
            .lock()
            .unwrap()
            .entry(thread_id.to_string())
            .or_default()
            .clone();
        Ok(StateLock::new(lock.lock_owned().await))
    }
}
