//! State store trait for cross-process sandbox discovery.
//!
//! Persisted state is an optimization: a missing or corrupt record only
//! means the provider has to create a sandbox instead of recovering one.
//! The lock, however, is what keeps two processes from creating duplicate
//! sandboxes for the same thread.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::SandboxInfo;

/// Scoped exclusive lock returned by [`SandboxStateStore::lock`].
///
/// The lock is released when the value is dropped, on every exit path.
pub struct StateLock {
    _guard: Box<dyn Send>,
}

impl StateLock {
    /// Wrap any guard whose `Drop` releases the underlying lock.
    pub fn new<G: Send + 'static>(guard: G) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for StateLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StateLock")
    }
}

/// Durable, cross-process record of the thread → sandbox mapping.
#[async_trait]
pub trait SandboxStateStore: Send + Sync {
    /// Persist the sandbox bound to a thread.
    async fn save(&self, thread_id: &str, info: &SandboxInfo) -> Result<()>;

    /// Load the sandbox bound to a thread. Unreadable state yields `None`.
    async fn load(&self, thread_id: &str) -> Option<SandboxInfo>;

    /// Forget the sandbox bound to a thread.
    async fn remove(&self, thread_id: &str);

    /// Block until the exclusive lock for `thread_id` is held.
    ///
    /// Not re-entrant: a second call for the same thread waits for the first
    /// guard to drop, even from the same process.
    async fn lock(&self, thread_id: &str) -> Result<StateLock>;
}
