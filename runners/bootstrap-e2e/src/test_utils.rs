//! Test utilities for phase unit tests
//!
//! Builds bootstrap contexts wired to the scripted collaborators.

#[cfg(test)]
use crate::config::RunConfig;
#[cfg(test)]
use crate::context::{BootstrapContext, Collaborators};
#[cfg(test)]
use convergence::mock::{
    InMemoryIdentityAllocator, RecordingBootScriptConfigurator, RecordingProcessRunner, ScriptedFileFetcher,
    ScriptedRemoteRunner, ScriptedStatusAccessor,
};
#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::Arc;

/// Scripted collaborators shared between a test and its context
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct Mocks {
    pub status: ScriptedStatusAccessor,
    pub remote: ScriptedRemoteRunner,
    pub process: RecordingProcessRunner,
    pub identity: InMemoryIdentityAllocator,
    pub fetcher: ScriptedFileFetcher,
    pub boot_scripts: RecordingBootScriptConfigurator,
}

#[cfg(test)]
impl Mocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            status: Arc::new(self.status.clone()),
            remote: Arc::new(self.remote.clone()),
            process: Arc::new(self.process.clone()),
            identity: Arc::new(self.identity.clone()),
            fetcher: Arc::new(self.fetcher.clone()),
            boot_scripts: Arc::new(self.boot_scripts.clone()),
        }
    }
}

/// Config for cluster `hardened` with `overrides` applied on top
#[cfg(test)]
pub fn test_config(overrides: &[(&str, &str)]) -> RunConfig {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("CLUSTER_NAME".to_string(), "hardened".to_string()),
        ("INSTALL_VM_SCRIPT".to_string(), "install-vm".to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    RunConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Context over `mocks` with `overrides` applied to the default test config
#[cfg(test)]
pub fn context_with(mocks: &Mocks, overrides: &[(&str, &str)]) -> BootstrapContext {
    BootstrapContext::new(test_config(overrides), mocks.collaborators()).unwrap()
}
