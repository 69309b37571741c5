//! Bootstrap phases, in execution order:
//!
//! 1. `check-registration`: registration listed (skipped for ISO boot)
//! 2. `fetch-registration-config`: install config downloaded (skipped for ISO boot)
//! 3. `configure-ipxe`: boot scripts pointed at the HTTP server (skipped for ISO boot)
//! 4. `provision-nodes`: declare and install every node
//! 5. `join-nodes`: boot nodes, check SSH, TPM and OS release
//! 6. `verify-hosts`: `ElementalHost` readiness per node
//! 7. `verify-machines`: `ElementalMachine` readiness
//! 8. `verify-cluster`: CAPI `Cluster` readiness

mod boot_config;
mod join;
mod provision;
mod registration;
mod verify;

pub use boot_config::{ConfigureIpxe, FetchRegistrationConfig};
pub use join::JoinNodes;
pub use provision::ProvisionNodes;
pub use registration::CheckRegistration;
pub use verify::{VerifyCluster, VerifyHosts, VerifyMachines};

use crate::context::BootstrapContext;
use convergence::PhasePlan;

pub const CHECK_REGISTRATION: &str = "check-registration";
pub const FETCH_REGISTRATION_CONFIG: &str = "fetch-registration-config";
pub const CONFIGURE_IPXE: &str = "configure-ipxe";
pub const PROVISION_NODES: &str = "provision-nodes";
pub const JOIN_NODES: &str = "join-nodes";
pub const VERIFY_HOSTS: &str = "verify-hosts";
pub const VERIFY_MACHINES: &str = "verify-machines";
pub const VERIFY_CLUSTER: &str = "verify-cluster";

/// Full bootstrap plan
pub fn bootstrap_plan() -> PhasePlan<BootstrapContext> {
    PhasePlan::new()
        .then(CheckRegistration)
        .then(FetchRegistrationConfig)
        .then(ConfigureIpxe)
        .then(ProvisionNodes)
        .then(JoinNodes)
        .then(VerifyHosts)
        .then(VerifyMachines)
        .then(VerifyCluster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{context_with, Mocks};
    use convergence::{PhaseStatus, ReadinessMatrix, ResourceKind, ResourceRef};

    #[test]
    fn test_plan_order() {
        assert_eq!(
            bootstrap_plan().names(),
            [
                CHECK_REGISTRATION,
                FETCH_REGISTRATION_CONFIG,
                CONFIGURE_IPXE,
                PROVISION_NODES,
                JOIN_NODES,
                VERIFY_HOSTS,
                VERIFY_MACHINES,
                VERIFY_CLUSTER
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_on_converging_fleet() {
        let mocks = Mocks::new();
        let matrix = ReadinessMatrix::shared();
        mocks.remote.script("echo SSH_OK", vec![Ok("SSH_OK\n".to_string())]);
        for host in ["node-001", "node-002"] {
            let resource = ResourceRef::new(ResourceKind::ElementalHost, "default", host);
            mocks
                .status
                .converge_all(&resource, matrix.conditions_for(resource.kind).unwrap());
        }
        mocks.status.set_list("default", ResourceKind::ElementalMachine, &["m-1"]);
        let machine = ResourceRef::new(ResourceKind::ElementalMachine, "default", "m-1");
        mocks
            .status
            .converge_all(&machine, matrix.conditions_for(machine.kind).unwrap());
        let cluster = ResourceRef::new(ResourceKind::Cluster, "default", "hardened");
        mocks
            .status
            .converge_all(&cluster, matrix.conditions_for(cluster.kind).unwrap());

        let mut ctx = context_with(&mocks, &[("VM_INDEX", "1"), ("VM_NUMBERS", "2"), ("BOOT_TYPE", "iso")]);
        let report = bootstrap_plan().run(&mut ctx).await;

        assert!(report.succeeded(), "{:?}", report.failure);
        for skipped in &report.phases[..3] {
            assert_eq!(skipped.status, PhaseStatus::Skipped);
        }
        assert_eq!(
            report.completed(),
            [PROVISION_NODES, JOIN_NODES, VERIFY_HOSTS, VERIFY_MACHINES, VERIFY_CLUSTER]
        );
        // install + start per node
        assert_eq!(mocks.process.calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_failed_install() {
        let mocks = Mocks::new();
        mocks.process.fail_when_contains("install-vm");

        let mut ctx = context_with(&mocks, &[("VM_INDEX", "1"), ("BOOT_TYPE", "iso")]);
        let report = bootstrap_plan().run(&mut ctx).await;

        assert!(!report.succeeded());
        assert_eq!(report.phases.len(), 4);
        assert_eq!(report.phases[3].name, PROVISION_NODES);
        assert_eq!(report.phases[3].status, PhaseStatus::Failed);
        // nothing was started
        assert_eq!(mocks.process.calls().len(), 1);
    }
}
