#![deny(unused)]
//! Sandbox Fleet - sandbox lifecycle management.
//!
//! Usage:
//!   sandbox-fleet provisioner [--port 8002]         # Run the cluster-side provisioning service
//!   sandbox-fleet lease [--thread <id>] [--config]  # Hold a sandbox until interrupted

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use fleet_core::config::SandboxConfig;
use fleet_provisioner::{startup, Provisioner, ProvisionerSettings};
use fleet_sandbox::{shutdown, SandboxProvider, ShutdownHooks};

#[derive(Parser, Debug)]
#[command(name = "sandbox-fleet")]
#[command(about = "Lease isolated sandboxes to conversation threads", version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the provisioning service against the configured cluster
    Provisioner {
        /// Port to listen on (defaults to PROVISIONER_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Acquire a sandbox and hold it until SIGINT/SIGTERM
    Lease {
        /// Thread to bind the sandbox to; omit for an anonymous sandbox
        #[arg(long)]
        thread: Option<String>,

        /// Configuration file (defaults to config/sandbox.*)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fleet_core::telemetry::configure_tracing()?;

    let args = Args::parse();
    tracing::info!("Starting Sandbox Fleet v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Commands::Provisioner { port } => run_provisioner(port).await,
        Commands::Lease { thread, config } => run_lease(thread, config).await,
    }
}

async fn run_provisioner(port: Option<u16>) -> anyhow::Result<()> {
    let mut settings = ProvisionerSettings::from_env()?;
    if let Some(port) = port {
        settings.provisioner_port = port;
    }

    let cluster = startup::connect(&settings).await?;
    let port = settings.provisioner_port;
    let provisioner = Arc::new(Provisioner::new(Arc::new(cluster), settings));

    tokio::select! {
        result = fleet_provisioner::serve(provisioner, port) => result?,
        signal = shutdown::wait_for_signal() => {
            let signo = signal?;
            tracing::info!(signal = signo, "Provisioner shutting down");
        }
    }
    Ok(())
}

async fn run_lease(thread: Option<String>, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => SandboxConfig::load_from(path)?,
        None => SandboxConfig::load()?,
    };
    let provider = SandboxProvider::from_config(&config)?;

    let hooks = ShutdownHooks::new();
    hooks.register_provider(provider.clone());

    let sandbox_id = match provider.acquire(thread.as_deref()).await {
        Ok(id) => id,
        Err(e) => {
            hooks.run().await;
            return Err(e.into());
        }
    };

    if let Some(handle) = provider.get(&sandbox_id) {
        println!("{} {}", handle.id, handle.base_url);
    }
    tracing::info!(
        sandbox_id = %sandbox_id,
        thread_id = ?thread,
        "Holding sandbox until interrupted"
    );

    hooks.listen_for_signals().await?;
    Ok(())
}
