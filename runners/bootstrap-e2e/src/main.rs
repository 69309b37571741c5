//! Bootstrap E2E runner
//!
//! Provisions Elemental nodes on a libvirt host and waits for the management
//! cluster to report them ready:
//! - registers and installs every node (paced, bounded concurrency)
//! - boots the nodes and checks SSH, TPM and OS release
//! - waits for ElementalHosts, ElementalMachines and the CAPI Cluster
//!
//! Configuration comes from environment variables (see `config.rs`).

mod config;
mod context;
mod error;
mod phases;
mod test_utils;

use crate::config::RunConfig;
use crate::context::{BootstrapContext, Collaborators};
use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting bootstrap E2E run");

    let config = RunConfig::from_env().context("Failed to load configuration")?;
    info!("Configuration:");
    info!("  Cluster: {}/{}", config.cluster_namespace, config.cluster_name);
    info!("  Nodes: {}..={} ({} used)", config.vm_index, config.vm_numbers, config.used_nodes());
    info!("  Boot: {}, emulated TPM: {}", if config.iso_boot { "iso" } else { "network" }, config.emulate_tpm);
    info!("  Max concurrent nodes: {}", config.pacing.max_in_flight);

    let tools = Collaborators::from_config(&config)
        .await
        .context("Failed to set up collaborators")?;
    let suite_timeout = config.suite_timeout;
    let mut ctx = BootstrapContext::new(config, tools)?;
    info!(run_id = %ctx.run.run_id, "Run context ready");

    let cancel = ctx.run.cancel.clone();
    if let Some(limit) = suite_timeout {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(limit) => {
                    warn!(limit_secs = limit.as_secs(), "Suite timeout reached, cancelling run");
                    cancel.cancel();
                }
            }
        });
    }
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                cancel.cancel();
            }
        });
    }

    let report = phases::bootstrap_plan().run(&mut ctx).await;
    cancel.cancel();
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(e) = report.error() {
        error!(error = %e, "Bootstrap run failed");
    } else {
        info!(phases = report.completed().len(), "Bootstrap run succeeded");
    }
    report.into_result().context("Bootstrap run failed")?;
    Ok(())
}
