//! Provider integration tests.
//!
//! Run against `MockBackend` and `InMemoryStateStore`; no Docker or cluster
//! is needed. Two providers sharing one backend and one store behave like two
//! processes on the same host.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::config::SandboxConfig;
use fleet_core::mocks::{InMemoryStateStore, MockBackend};
use fleet_core::paths::{Paths, VIRTUAL_PATH_PREFIX};
use fleet_core::{Error, SandboxInfo};
use fleet_sandbox::{
    deterministic_sandbox_id, FileStateStore, MountPlanner, ProviderOptions, SandboxProvider,
};

// =============================================================================
// Helpers
// =============================================================================

fn no_idle() -> ProviderOptions {
    ProviderOptions {
        idle_timeout: None,
        ready_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

fn provider(
    backend: &Arc<MockBackend>,
    store: &Arc<InMemoryStateStore>,
    base_dir: &Path,
    options: ProviderOptions,
) -> SandboxProvider {
    SandboxProvider::new(
        backend.clone(),
        store.clone(),
        MountPlanner::new(Paths::new(base_dir), None, "/mnt/skills"),
        options,
    )
}

struct Fixture {
    backend: Arc<MockBackend>,
    store: Arc<InMemoryStateStore>,
    tmp: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self::with_backend(MockBackend::new())
    }

    fn with_backend(backend: MockBackend) -> Self {
        Self {
            backend: Arc::new(backend),
            store: Arc::new(InMemoryStateStore::new()),
            tmp: tempfile::tempdir().unwrap(),
        }
    }

    fn provider(&self) -> SandboxProvider {
        provider(&self.backend, &self.store, self.tmp.path(), no_idle())
    }
}

// =============================================================================
// Determinism & deduplication
// =============================================================================

#[tokio::test]
async fn test_same_thread_same_sandbox() {
    let fx = Fixture::new();
    let provider = fx.provider();

    let first = provider.acquire(Some("abc123")).await.unwrap();
    let second = provider.acquire(Some("abc123")).await.unwrap();

    assert_eq!(first, "6ca13d52");
    assert_eq!(first, deterministic_sandbox_id("abc123"));
    assert_eq!(second, first);
    assert_eq!(fx.backend.create_count(), 1);
    assert_eq!(provider.thread_sandbox("abc123").as_deref(), Some("6ca13d52"));
    assert_eq!(
        fx.store.get("abc123").map(|info| info.sandbox_id),
        Some(first)
    );
}

#[tokio::test]
async fn test_concurrent_acquires_create_once() {
    let fx = Fixture::with_backend(MockBackend::new().with_create_delay(Duration::from_millis(50)));
    let provider = fx.provider();

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let provider = provider.clone();
            tokio::spawn(async move { provider.acquire(Some("t1")).await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "628b49d9");
    }
    assert_eq!(fx.backend.create_count(), 1);
}

#[tokio::test]
async fn test_concurrent_acquires_across_processes_create_once() {
    let fx = Fixture::with_backend(MockBackend::new().with_create_delay(Duration::from_millis(50)));
    let process_a = fx.provider();
    let process_b = fx.provider();

    let (a, b) = tokio::join!(
        process_a.acquire(Some("shared-thread")),
        process_b.acquire(Some("shared-thread"))
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(fx.backend.create_count(), 1);
    assert_eq!(fx.backend.running_count(), 1);
}

#[tokio::test]
async fn test_different_threads_are_independent() {
    let fx = Fixture::new();
    let provider = fx.provider();

    let a = provider.acquire(Some("thread-a")).await.unwrap();
    let b = provider.acquire(Some("thread-b")).await.unwrap();

    assert_ne!(a, b);
    assert_eq!(fx.backend.create_count(), 2);
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(provider.active_sandbox_ids(), expected);
}

// =============================================================================
// Anonymous sandboxes
// =============================================================================

#[tokio::test]
async fn test_anonymous_sandboxes_are_fresh_and_unpersisted() {
    let fx = Fixture::new();
    let provider = fx.provider();

    let a = provider.acquire(None).await.unwrap();
    let b = provider.acquire(Some("")).await.unwrap();

    assert_ne!(a, b);
    assert_eq!(a.len(), 8);
    assert_eq!(fx.backend.create_count(), 2);
    assert!(fx.store.is_empty());
    assert!(provider.get(&a).is_some());
    // Anonymous sandboxes get no thread mounts.
    assert!(fx.backend.last_mounts().is_empty());
}

#[tokio::test]
async fn test_thread_mounts_are_planned() {
    let fx = Fixture::new();
    let provider = fx.provider();

    provider.acquire(Some("thread-7")).await.unwrap();

    let targets: Vec<String> = fx
        .backend
        .last_mounts()
        .into_iter()
        .map(|m| m.container_path)
        .collect();
    assert_eq!(
        targets,
        vec![
            format!("{}/workspace", VIRTUAL_PATH_PREFIX),
            format!("{}/uploads", VIRTUAL_PATH_PREFIX),
            format!("{}/outputs", VIRTUAL_PATH_PREFIX),
        ]
    );
    assert!(fx
        .tmp
        .path()
        .join("threads/thread-7/user-data/workspace")
        .is_dir());
}

#[tokio::test]
async fn test_invalid_thread_id_rejected() {
    let fx = Fixture::new();
    let provider = fx.provider();

    let result = provider.acquire(Some("../etc")).await;
    assert!(matches!(result, Err(Error::InvalidThreadId(_))));
    assert_eq!(fx.backend.create_count(), 0);
}

// =============================================================================
// get / release
// =============================================================================

#[tokio::test]
async fn test_get_returns_handle() {
    let fx = Fixture::new();
    let provider = fx.provider();

    let id = provider.acquire(Some("t1")).await.unwrap();
    let handle = provider.get(&id).unwrap();

    assert_eq!(handle.id, id);
    assert!(handle.base_url.starts_with("http://mock-sandbox:"));
    assert!(provider.get("unknown").is_none());
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let fx = Fixture::new();
    let provider = fx.provider();

    let id = provider.acquire(Some("t1")).await.unwrap();
    provider.release(&id).await;
    provider.release(&id).await;

    assert_eq!(fx.backend.destroy_count(), 1);
    assert!(provider.get(&id).is_none());
    assert!(provider.thread_sandbox("t1").is_none());
    assert!(fx.store.get("t1").is_none());
}

#[tokio::test]
async fn test_reacquire_after_release_creates_again() {
    let fx = Fixture::new();
    let provider = fx.provider();

    let first = provider.acquire(Some("t1")).await.unwrap();
    provider.release(&first).await;
    let second = provider.acquire(Some("t1")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(fx.backend.create_count(), 2);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_readiness_timeout_destroys_and_fails() {
    let fx = Fixture::new();
    fx.backend.set_ready(false);
    let provider = fx.provider();

    let result = provider.acquire(Some("t1")).await;

    assert!(matches!(result, Err(Error::ReadinessTimeout { .. })));
    assert_eq!(fx.backend.create_count(), 1);
    assert_eq!(fx.backend.destroy_count(), 1);
    assert_eq!(fx.backend.running_count(), 0);
    assert!(fx.store.is_empty());
    assert!(provider.active_sandbox_ids().is_empty());
}

#[tokio::test]
async fn test_create_failure_propagates() {
    let fx = Fixture::new();
    fx.backend.set_fail_create(true);
    let provider = fx.provider();

    assert!(provider.acquire(Some("t1")).await.is_err());
    assert!(fx.store.is_empty());

    // The thread is not poisoned once the backend recovers.
    fx.backend.set_fail_create(false);
    assert_eq!(provider.acquire(Some("t1")).await.unwrap(), "628b49d9");
}

// =============================================================================
// Recovery
// =============================================================================

#[tokio::test]
async fn test_recovery_after_restart() {
    let fx = Fixture::new();

    let id = {
        let process_a = fx.provider();
        process_a.acquire(Some("t1")).await.unwrap()
        // process A dies without shutting down
    };

    let process_b = fx.provider();
    let recovered = process_b.acquire(Some("t1")).await.unwrap();

    assert_eq!(recovered, id);
    assert_eq!(fx.backend.create_count(), 1);
    assert_eq!(fx.backend.discover_count(), 1);
    assert!(process_b.get(&id).is_some());
}

#[tokio::test]
async fn test_recovery_adopts_new_url() {
    let fx = Fixture::new();
    let id = fx.provider().acquire(Some("t1")).await.unwrap();
    fx.backend.move_to(&id, "http://mock-sandbox:40000");

    let process_b = fx.provider();
    process_b.acquire(Some("t1")).await.unwrap();

    assert_eq!(process_b.get(&id).unwrap().base_url, "http://mock-sandbox:40000");
    assert_eq!(
        fx.store.get("t1").unwrap().sandbox_url,
        "http://mock-sandbox:40000"
    );
    assert_eq!(fx.backend.create_count(), 1);
}

#[tokio::test]
async fn test_stale_state_is_evicted() {
    let fx = Fixture::new();
    let stale = SandboxInfo::new("628b49d9", "http://gone:1");
    {
        use fleet_core::SandboxStateStore;
        fx.store.save("t1", &stale).await.unwrap();
    }

    let provider = fx.provider();
    let id = provider.acquire(Some("t1")).await.unwrap();

    assert_eq!(id, "628b49d9");
    assert_eq!(fx.backend.discover_count(), 1);
    assert_eq!(fx.backend.create_count(), 1);
    let persisted = fx.store.get("t1").unwrap();
    assert_ne!(persisted.sandbox_url, stale.sandbox_url);
}

#[tokio::test]
async fn test_release_in_both_processes_then_reacquire() {
    let fx = Fixture::new();
    let provider = fx.provider();
    let process_b = fx.provider();

    let id = provider.acquire(Some("t1")).await.unwrap();
    // Another process releases the sandbox; this one still maps the thread.
    process_b.acquire(Some("t1")).await.unwrap();
    process_b.release(&id).await;
    provider.release(&id).await;

    let again = provider.acquire(Some("t1")).await.unwrap();
    assert_eq!(again, id);
    assert!(fx.backend.is_running(&id));
}

// =============================================================================
// Idle reclamation
// =============================================================================

#[tokio::test]
async fn test_idle_sandbox_is_reclaimed() {
    let fx = Fixture::new();
    let provider = provider(
        &fx.backend,
        &fx.store,
        fx.tmp.path(),
        ProviderOptions {
            idle_timeout: Some(Duration::from_millis(100)),
            idle_check_interval: Duration::from_millis(50),
            ready_timeout: Duration::from_secs(1),
        },
    );

    let id = provider.acquire(Some("t1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(provider.get(&id).is_none());
    assert_eq!(fx.backend.destroy_count(), 1);
    assert!(fx.store.get("t1").is_none());
    // Stays released until explicitly re-acquired.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fx.backend.create_count(), 1);

    provider.shutdown().await;
}

#[tokio::test]
async fn test_zero_idle_timeout_disables_reclaimer() {
    let fx = Fixture::new();
    let provider = provider(
        &fx.backend,
        &fx.store,
        fx.tmp.path(),
        ProviderOptions {
            idle_timeout: Some(Duration::ZERO),
            idle_check_interval: Duration::from_millis(10),
            ready_timeout: Duration::from_secs(1),
        },
    );

    let id = provider.acquire(Some("t1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(provider.get(&id).is_some());
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_releases_everything_once() {
    let fx = Fixture::new();
    let provider = provider(&fx.backend, &fx.store, fx.tmp.path(), ProviderOptions::default());

    provider.acquire(Some("t1")).await.unwrap();
    provider.acquire(None).await.unwrap();

    provider.shutdown().await;
    provider.shutdown().await;

    assert!(provider.is_shut_down());
    assert_eq!(fx.backend.destroy_count(), 2);
    assert!(provider.active_sandbox_ids().is_empty());
    assert!(fx.store.is_empty());
    assert!(provider.acquire(Some("t1")).await.is_err());
}

#[tokio::test]
async fn test_shutdown_during_create_destroys_late_sandbox() {
    let backend = MockBackend::new().with_create_delay(Duration::from_millis(200));
    let fx = Fixture::with_backend(backend);
    let provider = fx.provider();

    let pending = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.acquire(Some("t1")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    provider.shutdown().await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::Internal(_))));
    assert_eq!(fx.backend.create_count(), 1);
    assert_eq!(fx.backend.running_count(), 0);
    assert!(provider.active_sandbox_ids().is_empty());
    assert!(fx.store.is_empty());
}

#[tokio::test]
async fn test_shutdown_during_anonymous_create_destroys_late_sandbox() {
    let backend = MockBackend::new().with_create_delay(Duration::from_millis(200));
    let fx = Fixture::with_backend(backend);
    let provider = fx.provider();

    let pending = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.acquire(None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    provider.shutdown().await;

    assert!(pending.await.unwrap().is_err());
    assert_eq!(fx.backend.running_count(), 0);
    assert_eq!(fx.backend.destroy_count(), 1);
    assert!(provider.active_sandbox_ids().is_empty());
}

// =============================================================================
// File state store
// =============================================================================

fn file_provider(backend: &Arc<MockBackend>, base_dir: &Path) -> SandboxProvider {
    SandboxProvider::new(
        backend.clone(),
        Arc::new(FileStateStore::new(base_dir)),
        MountPlanner::new(Paths::new(base_dir), None, "/mnt/skills"),
        no_idle(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_store_shared_by_processes_and_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new().with_create_delay(Duration::from_millis(50)));

    let process_a = file_provider(&backend, tmp.path());
    let process_b = file_provider(&backend, tmp.path());
    let (a, b) = tokio::join!(
        process_a.acquire(Some("shared-thread")),
        process_b.acquire(Some("shared-thread"))
    );
    let id = a.unwrap();
    assert_eq!(b.unwrap(), id);
    assert_eq!(backend.create_count(), 1);

    let state_file = Paths::new(tmp.path())
        .thread_dir("shared-thread")
        .unwrap()
        .join("sandbox.json");
    assert!(state_file.is_file());

    // A fresh provider on the same directory recovers instead of creating.
    let restarted = file_provider(&backend, tmp.path());
    assert_eq!(restarted.acquire(Some("shared-thread")).await.unwrap(), id);
    assert_eq!(backend.create_count(), 1);

    restarted.release(&id).await;
    assert!(!state_file.exists());
    assert_eq!(backend.running_count(), 0);
}

// =============================================================================
// Backend selection
// =============================================================================

#[tokio::test]
async fn test_no_backend_is_config_error() {
    let tmp = tempfile::tempdir().unwrap();
    let config = SandboxConfig {
        auto_start: false,
        provisioner_url: Some("  ".into()),
        base_dir: Some(tmp.path().to_path_buf()),
        ..Default::default()
    };

    assert!(matches!(
        SandboxProvider::from_config(&config),
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn test_provisioner_url_selects_remote() {
    let tmp = tempfile::tempdir().unwrap();
    let config = SandboxConfig {
        auto_start: false,
        provisioner_url: Some("http://provisioner:8002".into()),
        base_dir: Some(tmp.path().to_path_buf()),
        ..Default::default()
    };

    let provider = SandboxProvider::from_config(&config).unwrap();
    assert!(provider.active_sandbox_ids().is_empty());
    provider.shutdown().await;
}
