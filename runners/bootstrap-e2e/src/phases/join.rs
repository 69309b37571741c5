//! Node boot and health-check phase.

use crate::context::BootstrapContext;
use async_trait::async_trait;
use convergence::{
    derive_identity, ConvergenceError, NodeWorkItem, Phase, PollBudget, Poller, ProcessRunner,
    RemoteRunner, ResourceClass,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Starts every installed node and checks it is usable: SSH answers, the TPM
/// device matches the run's TPM mode, and the OS release can be read.
#[derive(Debug, Default)]
pub struct JoinNodes;

/// Shell test for the TPM device
#[must_use]
pub fn tpm_check(emulated: bool) -> &'static str {
    if emulated {
        "[[ ! -e /dev/tpm0 ]]"
    } else {
        "[[ -c /dev/tpm0 ]]"
    }
}

struct NodeCheck {
    process: Arc<dyn ProcessRunner>,
    remote: Arc<dyn RemoteRunner>,
    user: String,
    password: Option<String>,
    emulate_tpm: bool,
    ssh_budget: PollBudget,
    command_budget: PollBudget,
}

impl NodeCheck {
    async fn run(&self, node: NodeWorkItem, cancel: CancellationToken) -> Result<(), ConvergenceError> {
        let hostname = node.hostname.as_str();
        let start = ["sudo", "virsh", "start", hostname].map(str::to_string);
        tokio::select! {
            () = cancel.cancelled() => return Err(ConvergenceError::Cancelled(format!("start of {hostname}"))),
            result = self.process.run(&start) => {
                result.map_err(|e| ConvergenceError::collaborator(format!("start {hostname}"), e))?;
            }
        }
        info!(%hostname, "Node started");

        let conn = node.connection(&self.user, self.password.as_deref());
        let conn = &conn;
        let remote = self.remote.as_ref();

        Poller::new(self.ssh_budget, cancel.clone())
            .wait_for(&format!("{hostname} SSH"), "SSH_OK".to_string(), || async move {
                remote
                    .run_remote(conn, "echo SSH_OK")
                    .await
                    .map(|out| out.trim_end_matches('\n').to_string())
            })
            .await?;
        info!(%hostname, address = %conn.address, "SSH reachable");

        let commands = Poller::new(self.command_budget, cancel);
        let tpm = tpm_check(self.emulate_tpm);
        commands
            .retry_until_ok(&format!("{hostname} TPM check"), || async move {
                remote.run_remote(conn, tpm).await
            })
            .await?;

        let os_release = commands
            .retry_until_ok(&format!("{hostname} OS release"), || async move {
                remote.run_remote(conn, "cat /etc/os-release").await
            })
            .await?;
        info!(%hostname, os_release = %os_release.trim(), "Node OS version");
        Ok(())
    }
}

#[async_trait]
impl Phase<BootstrapContext> for JoinNodes {
    fn name(&self) -> &str {
        super::JOIN_NODES
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<(), ConvergenceError> {
        let identity = Arc::clone(&ctx.tools.identity);
        let root = ctx.config.vm_name_root.clone();
        let check = Arc::new(NodeCheck {
            process: Arc::clone(&ctx.tools.process),
            remote: Arc::clone(&ctx.tools.remote),
            user: ctx.config.node_user.clone(),
            password: ctx.config.node_password.clone(),
            emulate_tpm: ctx.config.emulate_tpm,
            ssh_budget: ctx.run.poller(ResourceClass::SshReachability)?.budget(),
            command_budget: ctx.run.poller(ResourceClass::RemoteCommand)?.budget(),
        });

        let summary = ctx
            .run
            .scheduler()
            .provision_all(
                self.name(),
                ctx.run.node_range,
                |index| {
                    let identity = Arc::clone(&identity);
                    let root = root.clone();
                    async move { derive_identity(identity.as_ref(), &root, index, false).await }
                },
                move |node, cancel| {
                    let check = Arc::clone(&check);
                    async move { check.run(node, cancel).await }
                },
            )
            .await?;

        info!(nodes = summary.launched, elapsed_secs = summary.elapsed.as_secs(), "All nodes joined");
        Ok(())
    }
}
