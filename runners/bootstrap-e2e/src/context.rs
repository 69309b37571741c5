//! Bootstrap run context: engine state plus the collaborators phases use.

use crate::config::{AccessorKind, RunConfig};
use crate::error::RunnerError;
use convergence::{
    BootScriptConfigurator, FileFetcher, IdentityAllocator, PhaseContext, ProcessRunner, RemoteRunner,
    RunContext, StatusAccessor,
};
use host_tools::{
    HttpFileFetcher, IpxeScriptConfigurator, KubeStatusAccessor, KubectlStatusAccessor, LocalProcessRunner,
    NetFileAllocator, SshRunner,
};
use std::sync::Arc;
use tracing::info;

/// External tools used by the phases
#[derive(Clone)]
pub struct Collaborators {
    /// Reads cluster resource status
    pub status: Arc<dyn StatusAccessor>,
    /// Runs commands on nodes
    pub remote: Arc<dyn RemoteRunner>,
    /// Runs local programs
    pub process: Arc<dyn ProcessRunner>,
    /// Allocates hostnames and network identities
    pub identity: Arc<dyn IdentityAllocator>,
    /// Downloads files over HTTP
    pub fetcher: Arc<dyn FileFetcher>,
    /// Points network-boot scripts at the HTTP server
    pub boot_scripts: Arc<dyn BootScriptConfigurator>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Real collaborators for `config`
    pub async fn from_config(config: &RunConfig) -> Result<Self, RunnerError> {
        let status: Arc<dyn StatusAccessor> = match config.status_accessor {
            AccessorKind::Kubectl => Arc::new(KubectlStatusAccessor::new()),
            AccessorKind::Kube => Arc::new(KubeStatusAccessor::try_default().await?),
        };
        info!(accessor = ?config.status_accessor, net_file = %config.net_default_file.display(), "Collaborators ready");
        Ok(Self {
            status,
            remote: Arc::new(SshRunner::new()),
            process: Arc::new(LocalProcessRunner::new()),
            identity: Arc::new(NetFileAllocator::new(&config.net_default_file)),
            fetcher: Arc::new(HttpFileFetcher::new()?),
            boot_scripts: Arc::new(IpxeScriptConfigurator::new(&config.ipxe_script_dir)),
        })
    }
}

/// Context threaded through every bootstrap phase.
#[derive(Debug)]
pub struct BootstrapContext {
    /// Engine state (run id, node range, cancellation, pacing)
    pub run: RunContext,
    /// Run configuration
    pub config: Arc<RunConfig>,
    /// External tools
    pub tools: Collaborators,
}

impl BootstrapContext {
    /// Build the context for one run
    pub fn new(config: RunConfig, tools: Collaborators) -> Result<Self, RunnerError> {
        let run = RunContext::new(config.node_range, config.pacing, config.timeout_scale)?;
        Ok(Self {
            run,
            config: Arc::new(config),
            tools,
        })
    }

    /// Hostnames of every node under test, in index order
    #[must_use]
    pub fn expected_hostnames(&self) -> Vec<String> {
        self.run
            .node_range
            .iter()
            .map(|index| self.tools.identity.hostname_for(&self.config.vm_name_root, index))
            .collect()
    }
}

impl PhaseContext for BootstrapContext {
    fn run_context(&self) -> &RunContext {
        &self.run
    }
}
