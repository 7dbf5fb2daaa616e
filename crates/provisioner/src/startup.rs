//! Startup sequence: find credentials, connect, ensure the namespace.

use kube::config::{KubeConfigOptions, Kubeconfig};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

use fleet_core::{Error, Result};

use crate::kube_cluster::KubeCluster;
use crate::settings::ProvisionerSettings;

pub const KUBECONFIG_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const KUBECONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Wait for the kubeconfig file to be mounted.
///
/// Returns `true` once a regular file is present and `false` if nothing
/// appeared before `timeout`, in which case in-cluster credentials are used.
/// A directory or other non-file at the path is a configuration error and
/// is not retried.
pub async fn wait_for_kubeconfig(
    path: &Path,
    timeout: Duration,
    interval: Duration,
) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {
                tracing::info!(path = %path.display(), "Found kubeconfig file");
                return Ok(true);
            }
            Ok(meta) if meta.is_dir() => {
                return Err(Error::config(format!(
                    "Kubeconfig path is a directory. Please mount a kubeconfig file at {}.",
                    path.display()
                )));
            }
            Ok(_) => {
                return Err(Error::config(format!(
                    "Kubeconfig path exists but is not a regular file: {}",
                    path.display()
                )));
            }
            Err(_) => {}
        }

        if Instant::now() + interval > deadline {
            break;
        }
        tracing::info!(path = %path.display(), "Waiting for kubeconfig");
        tokio::time::sleep(interval).await;
    }

    tracing::warn!(
        path = %path.display(),
        timeout_secs = timeout.as_secs(),
        "Kubeconfig not found, will attempt in-cluster Kubernetes config"
    );
    Ok(false)
}

/// Build client configuration from the kubeconfig file, or from the
/// in-cluster service account when no file exists.
pub async fn load_client_config(settings: &ProvisionerSettings) -> Result<kube::Config> {
    let path = &settings.kubeconfig_path;

    let mut config = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {
            return Err(Error::config(format!(
                "KUBECONFIG_PATH points to a directory, expected a file: {}",
                path.display()
            )));
        }
        Ok(_) => {
            let load_error = |e: String| {
                Error::config(format!(
                    "Failed to load kubeconfig from {}: {}",
                    path.display(),
                    e
                ))
            };
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| load_error(e.to_string()))?;
            let options = KubeConfigOptions::default();
            let config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| load_error(e.to_string()))?;
            tracing::info!(path = %path.display(), "Loaded kubeconfig");
            config
        }
        Err(_) => {
            tracing::warn!(
                path = %path.display(),
                "Kubeconfig not found, trying in-cluster config"
            );
            kube::Config::incluster().map_err(|e| {
                Error::config(format!(
                    "Failed to initialize Kubernetes client. No kubeconfig at {}, \
                     and in-cluster config is unavailable: {}",
                    path.display(),
                    e
                ))
            })?
        }
    };

    // A kubeconfig written for the host usually points at localhost, which
    // is unreachable from inside a container.
    if let Some(server) = &settings.k8s_api_server {
        config.cluster_url = server
            .parse::<axum::http::Uri>()
            .map_err(|e| Error::config(format!("Invalid K8S_API_SERVER {}: {}", server, e)))?;
        // Local clusters use self-signed certificates.
        config.accept_invalid_certs = true;
        tracing::info!(api_server = %server, "Overriding Kubernetes API server");
    }

    Ok(config)
}

/// Run the full startup sequence and return a ready cluster handle.
pub async fn connect(settings: &ProvisionerSettings) -> Result<KubeCluster> {
    wait_for_kubeconfig(
        &settings.kubeconfig_path,
        KUBECONFIG_WAIT_TIMEOUT,
        KUBECONFIG_POLL_INTERVAL,
    )
    .await?;

    let config = load_client_config(settings).await?;
    let client = kube::Client::try_from(config)
        .map_err(|e| Error::config(format!("Failed to build Kubernetes client: {}", e)))?;

    let cluster = KubeCluster::new(client, &settings.k8s_namespace);
    cluster.ensure_namespace().await?;
    tracing::info!(namespace = %cluster.namespace(), "Provisioner is ready");
    Ok(cluster)
}
