//! Readiness verification phases.
//!
//! Each resource is checked against the readiness matrix with the poll
//! class of its kind; the first resource that does not converge fails the
//! phase.

use crate::context::BootstrapContext;
use async_trait::async_trait;
use convergence::{ConvergenceError, Phase, ResourceKind, ResourceRef};
use tracing::{info, warn};

async fn verify_all(ctx: &BootstrapContext, kind: ResourceKind, names: &[String]) -> Result<(), ConvergenceError> {
    let poller = ctx.run.poller(kind.poll_class())?;
    let status = ctx.tools.status.as_ref();
    for name in names {
        let resource = ResourceRef::new(kind, ctx.config.cluster_namespace.clone(), name.clone());
        ctx.run.matrix.wait_ready(status, &poller, &resource).await?;
        info!(%resource, "Resource ready");
    }
    Ok(())
}

/// Every node's `ElementalHost` reaches all host conditions.
#[derive(Debug, Default)]
pub struct VerifyHosts;

#[async_trait]
impl Phase<BootstrapContext> for VerifyHosts {
    fn name(&self) -> &str {
        super::VERIFY_HOSTS
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<(), ConvergenceError> {
        let hostnames = ctx.expected_hostnames();
        verify_all(ctx, ResourceKind::ElementalHost, &hostnames).await
    }
}

/// Every `ElementalMachine` of the namespace reaches all machine conditions.
#[derive(Debug, Default)]
pub struct VerifyMachines;

#[async_trait]
impl Phase<BootstrapContext> for VerifyMachines {
    fn name(&self) -> &str {
        super::VERIFY_MACHINES
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<(), ConvergenceError> {
        let namespace = ctx.config.cluster_namespace.as_str();
        let machines = ctx
            .tools
            .status
            .list_names(namespace, ResourceKind::ElementalMachine)
            .await
            .map_err(|e| ConvergenceError::collaborator(format!("list elementalmachine in {namespace}"), e))?;
        if machines.is_empty() {
            warn!(%namespace, "No elementalmachine found");
        }
        verify_all(ctx, ResourceKind::ElementalMachine, &machines).await
    }
}

/// The CAPI `Cluster` reports control plane and infrastructure ready.
#[derive(Debug, Default)]
pub struct VerifyCluster;

#[async_trait]
impl Phase<BootstrapContext> for VerifyCluster {
    fn name(&self) -> &str {
        super::VERIFY_CLUSTER
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<(), ConvergenceError> {
        let cluster = [ctx.config.cluster_name.clone()];
        verify_all(ctx, ResourceKind::Cluster, &cluster).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{context_with, Mocks};
    use convergence::ReadinessMatrix;
    use std::time::Duration;
    use tokio::time::Instant;

    fn converge(mocks: &Mocks, kind: ResourceKind, name: &str) -> ResourceRef {
        let resource = ResourceRef::new(kind, "default", name);
        let specs = ReadinessMatrix::shared().conditions_for(kind).unwrap();
        mocks.status.converge_all(&resource, specs);
        resource
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_checked_by_hostname() {
        let mocks = Mocks::new();
        let first = converge(&mocks, ResourceKind::ElementalHost, "node-001");
        let second = converge(&mocks, ResourceKind::ElementalHost, "node-002");
        let mut ctx = context_with(&mocks, &[("VM_INDEX", "1"), ("VM_NUMBERS", "2")]);

        VerifyHosts.run(&mut ctx).await.unwrap();

        assert_eq!(mocks.status.reads(&first), 4);
        assert_eq!(mocks.status.reads(&second), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_deadline_scales_with_nodes() {
        let mocks = Mocks::new();
        let host = ResourceRef::new(ResourceKind::ElementalHost, "default", "node-001");
        mocks.status.script_condition(&host, "RegistrationReady", ["False"]);
        let mut ctx = context_with(&mocks, &[("VM_INDEX", "1"), ("VM_NUMBERS", "3")]);

        let started = Instant::now();
        let err = VerifyHosts.run(&mut ctx).await.unwrap_err();

        // 2m per node, 3 nodes
        assert_eq!(started.elapsed(), Duration::from_secs(360));
        match err {
            ConvergenceError::Timeout { what, last_observed, .. } => {
                assert!(what.contains("node-001"));
                assert!(what.contains("RegistrationReady"));
                assert_eq!(last_observed, "\"False\"");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_machines_listed_then_verified() {
        let mocks = Mocks::new();
        mocks
            .status
            .set_list("default", ResourceKind::ElementalMachine, &["hardened-md-0-abc", "hardened-cp-xyz"]);
        let md = converge(&mocks, ResourceKind::ElementalMachine, "hardened-md-0-abc");
        let cp = converge(&mocks, ResourceKind::ElementalMachine, "hardened-cp-xyz");
        let mut ctx = context_with(&mocks, &[]);

        VerifyMachines.run(&mut ctx).await.unwrap();

        assert_eq!(mocks.status.reads(&md), 4);
        assert_eq!(mocks.status.reads(&cp), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cluster_waits_for_both_fields() {
        let mocks = Mocks::new();
        let cluster = ResourceRef::new(ResourceKind::Cluster, "default", "hardened");
        mocks.status.script_field(
            &cluster,
            convergence::FieldPath::StatusField("controlPlaneReady".to_string()),
            ["false", "false", "true"],
        );
        mocks.status.script_field(
            &cluster,
            convergence::FieldPath::StatusField("infrastructureReady".to_string()),
            ["true"],
        );
        let mut ctx = context_with(&mocks, &[]);

        let started = Instant::now();
        VerifyCluster.run(&mut ctx).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(20));
        assert_eq!(mocks.status.reads(&cluster), 4);
    }
}
