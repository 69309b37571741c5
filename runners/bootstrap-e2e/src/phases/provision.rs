//! Node installation phase.

use crate::context::BootstrapContext;
use async_trait::async_trait;
use convergence::{derive_identity, ConvergenceError, Phase};
use std::sync::Arc;
use tracing::info;

/// Declares every node in the network file, then installs the nodes
/// concurrently with the install script (`<script> <hostname> <mac>`).
#[derive(Debug, Default)]
pub struct ProvisionNodes;

#[async_trait]
impl Phase<BootstrapContext> for ProvisionNodes {
    fn name(&self) -> &str {
        super::PROVISION_NODES
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<(), ConvergenceError> {
        let identity = Arc::clone(&ctx.tools.identity);
        let process = Arc::clone(&ctx.tools.process);
        let root = ctx.config.vm_name_root.clone();
        let script = ctx.config.install_vm_script.display().to_string();

        let summary = ctx
            .run
            .scheduler()
            .provision_all(
                self.name(),
                ctx.run.node_range,
                |index| {
                    let identity = Arc::clone(&identity);
                    let root = root.clone();
                    async move { derive_identity(identity.as_ref(), &root, index, true).await }
                },
                move |node, cancel| {
                    let process = Arc::clone(&process);
                    let argv = vec![script.clone(), node.hostname.clone(), node.mac.clone()];
                    async move {
                        info!(hostname = %node.hostname, mac = %node.mac, "Installing node");
                        tokio::select! {
                            () = cancel.cancelled() => Err(ConvergenceError::Cancelled(format!("install of {}", node.hostname))),
                            result = process.run(&argv) => result
                                .map_err(|e| ConvergenceError::collaborator(format!("install {}", node.hostname), e)),
                        }
                    }
                },
            )
            .await?;

        info!(nodes = summary.launched, elapsed_secs = summary.elapsed.as_secs(), "All nodes installed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{context_with, Mocks};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_registers_then_installs_each_node() {
        let mocks = Mocks::new();
        let mut ctx = context_with(&mocks, &[("VM_INDEX", "1"), ("VM_NUMBERS", "3")]);

        ProvisionNodes.run(&mut ctx).await.unwrap();

        assert_eq!(mocks.identity.registrations(), ["node-001", "node-002", "node-003"]);
        let mut calls = mocks.process.calls();
        calls.sort();
        assert_eq!(
            calls,
            [
                ["install-vm", "node-001", "52:54:00:00:01:01"],
                ["install-vm", "node-002", "52:54:00:00:01:02"],
                ["install-vm", "node-003", "52:54:00:00:01:03"],
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_installs_overlap_within_bound() {
        let mocks = Mocks::new();
        mocks.process.delay_when_contains("install-vm", Duration::from_secs(600));
        let mut ctx = context_with(
            &mocks,
            &[("VM_INDEX", "1"), ("VM_NUMBERS", "8"), ("MAX_CONCURRENT_NODES", "3")],
        );

        ProvisionNodes.run(&mut ctx).await.unwrap();

        assert_eq!(mocks.process.calls().len(), 8);
        assert_eq!(mocks.process.max_in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_install_stops_later_installs() {
        let mocks = Mocks::new();
        mocks.process.fail_when_contains("node-002");
        let mut ctx = context_with(&mocks, &[("VM_INDEX", "1"), ("VM_NUMBERS", "3")]);

        let err = ProvisionNodes.run(&mut ctx).await.unwrap_err();

        // node-002 fails while the launch of node-003 is paced
        let calls = mocks.process.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|argv| !argv.iter().any(|a| a.contains("node-003"))));
        match err {
            ConvergenceError::PhaseFailed { phase, failures } => {
                assert_eq!(phase, "provision-nodes");
                assert_eq!(failures.len(), 1);
                assert!(failures[0].to_string().contains("node-002"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
