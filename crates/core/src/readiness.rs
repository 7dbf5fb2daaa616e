//! Timed-retry helpers shared by the backends and the provisioning service.

use std::future::Future;
use std::time::Duration;

/// Health probe path exposed by every sandbox image.
pub const READY_PROBE_PATH: &str = "/v1/sandbox";

/// Delay between readiness probes.
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Per-request timeout for a single readiness probe.
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll a sandbox's health endpoint until it answers 2xx or `timeout` elapses.
pub async fn wait_for_sandbox_ready(sandbox_url: &str, timeout: Duration) -> bool {
    poll_until_ready(sandbox_url, timeout, READY_POLL_INTERVAL).await
}

/// Same as [`wait_for_sandbox_ready`] with an explicit poll interval.
pub async fn poll_until_ready(sandbox_url: &str, timeout: Duration, interval: Duration) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(PROBE_REQUEST_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build readiness probe client");
            return false;
        }
    };
    let probe_url = format!("{}{}", sandbox_url.trim_end_matches('/'), READY_PROBE_PATH);

    let probe = async {
        loop {
            match client.get(&probe_url).send().await {
                Ok(resp) if resp.status().is_success() => return,
                Ok(resp) => {
                    tracing::debug!(
                        url = %probe_url,
                        status = %resp.status(),
                        "Sandbox not ready yet"
                    );
                }
                Err(e) => {
                    tracing::debug!(url = %probe_url, error = %e, "Sandbox not reachable yet");
                }
            }
            tokio::time::sleep(interval).await;
        }
    };

    tokio::time::timeout(timeout, probe).await.is_ok()
}

/// Run `probe` up to `attempts` times, sleeping `interval` between tries,
/// and return the first `Some` it yields.
pub async fn retry_until<T, F, Fut>(attempts: usize, interval: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 0..attempts {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    None
}
