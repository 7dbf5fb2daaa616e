//! Process shutdown hooks.
//!
//! The normal exit path and the signal listener both call [`ShutdownHooks::run`],
//! which executes every registered hook at most once. After a signal the
//! process exits with `128 + signo`, as a default signal action would.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use fleet_core::Result;

use crate::provider::SandboxProvider;

const SIGINT: i32 = 2;
const SIGTERM: i32 = 15;

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
struct HooksInner {
    hooks: Mutex<Vec<Hook>>,
    ran: AtomicBool,
}

/// Registry of async teardown hooks, executed in registration order.
#[derive(Clone, Default)]
pub struct ShutdownHooks {
    inner: Arc<HooksInner>,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .hooks
            .lock()
            .unwrap()
            .push(Box::new(move || Box::pin(hook())));
    }

    /// Shut the provider down when the hooks run.
    pub fn register_provider(&self, provider: SandboxProvider) {
        self.register(move || async move { provider.shutdown().await });
    }

    /// Run every hook. Only the first call does anything.
    pub async fn run(&self) {
        if self.inner.ran.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks = std::mem::take(&mut *self.inner.hooks.lock().unwrap());
        tracing::debug!(count = hooks.len(), "Running shutdown hooks");
        for hook in hooks {
            hook().await;
        }
    }

    pub fn has_run(&self) -> bool {
        self.inner.ran.load(Ordering::SeqCst)
    }

    /// Wait for SIGINT or SIGTERM, run the hooks, then exit the process.
    pub async fn listen_for_signals(&self) -> Result<()> {
        let signo = wait_for_signal().await?;
        tracing::info!(signal = signo, "Received termination signal, shutting down");
        self.run().await;
        std::process::exit(128 + signo);
    }
}

/// Resolve with the number of the first termination signal received.
#[cfg(unix)]
pub async fn wait_for_signal() -> Result<i32> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let signo = tokio::select! {
        _ = interrupt.recv() => SIGINT,
        _ = terminate.recv() => SIGTERM,
    };
    Ok(signo)
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> Result<i32> {
    tokio::signal::ctrl_c().await?;
    Ok(SIGINT)
}
