//! Scripted collaborators for unit testing
//!
//! In-memory implementations of the collaborator traits, used by the engine's
//! own tests and by runner tests (feature `test-util`) without a cluster,
//! hypervisor or SSH access.

use crate::collaborators::{
    BootScriptConfigurator, CollaboratorError, ConnectionInfo, FileFetcher, IdentityAllocator,
    NodeNetConfig, ProcessRunner, RemoteRunner, StatusAccessor,
};
use crate::readiness::{FieldPath, ResourceKind, ResourceRef};
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Script = VecDeque<Result<String, String>>;

/// Pops scripted answers; the last answer repeats forever.
fn next_answer(script: &mut Script) -> Result<String, String> {
    if script.len() > 1 {
        script.pop_front().unwrap_or_else(|| Err("script exhausted".to_string()))
    } else {
        script
            .front()
            .cloned()
            .unwrap_or_else(|| Err("script exhausted".to_string()))
    }
}

/// Status accessor answering from per-field scripts.
///
/// Unscripted fields fail like a resource that does not exist yet.
#[derive(Clone, Default)]
pub struct ScriptedStatusAccessor {
    fields: Arc<Mutex<HashMap<(ResourceRef, FieldPath), Script>>>,
    lists: Arc<Mutex<HashMap<(String, ResourceKind), Vec<String>>>>,
    reads: Arc<Mutex<HashMap<ResourceRef, usize>>>,
}

impl std::fmt::Debug for ScriptedStatusAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedStatusAccessor").finish_non_exhaustive()
    }
}

impl ScriptedStatusAccessor {
    /// Create an empty accessor
    pub fn new() -> Self {
        Self::default()
    }

    /// Script successive answers for a field
    pub fn script_field<I, S>(&self, resource: &ResourceRef, path: FieldPath, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = values.into_iter().map(|v| Ok(v.into())).collect();
        self.fields
            .lock()
            .unwrap()
            .insert((resource.clone(), path), script);
    }

    /// Script successive answers, including failures, for a field
    pub fn script_results(&self, resource: &ResourceRef, path: FieldPath, answers: Vec<Result<String, String>>) {
        self.fields
            .lock()
            .unwrap()
            .insert((resource.clone(), path), answers.into());
    }

    /// Script successive answers for a `.status.conditions` entry
    pub fn script_condition<I, S>(&self, resource: &ResourceRef, condition: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script_field(resource, FieldPath::ConditionStatus(condition.to_string()), values);
    }

    /// Mark every condition of a host, machine or cluster as converged
    pub fn converge_all(&self, resource: &ResourceRef, specs: &[crate::readiness::ConditionSpec]) {
        for spec in specs {
            self.script_field(resource, spec.path.clone(), [spec.expected.clone()]);
        }
    }

    /// Set the names returned by `list_names`
    pub fn set_list(&self, namespace: &str, kind: ResourceKind, names: &[&str]) {
        self.lists.lock().unwrap().insert(
            (namespace.to_string(), kind),
            names.iter().map(|n| (*n).to_string()).collect(),
        );
    }

    /// Number of field reads for a resource so far
    pub fn reads(&self, resource: &ResourceRef) -> usize {
        self.reads.lock().unwrap().get(resource).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl StatusAccessor for ScriptedStatusAccessor {
    async fn get_field(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        path: &FieldPath,
    ) -> Result<String, CollaboratorError> {
        let resource = ResourceRef::new(kind, namespace, name);
        *self.reads.lock().unwrap().entry(resource.clone()).or_default() += 1;

        let mut fields = self.fields.lock().unwrap();
        match fields.get_mut(&(resource.clone(), path.clone())) {
            Some(script) => next_answer(script).map_err(Into::into),
            None => Err(format!("{resource} not found").into()),
        }
    }

    async fn list_names(&self, namespace: &str, kind: ResourceKind) -> Result<Vec<String>, CollaboratorError> {
        Ok(self
            .lists
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }
}

/// Process runner that records every invocation.
///
/// Optionally sleeps per call (to observe overlap) and fails calls whose
/// argv mentions a given word.
#[derive(Clone, Default)]
pub struct RecordingProcessRunner {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    fail_on: Arc<Mutex<Vec<String>>>,
    delay: Arc<Mutex<HashMap<String, Duration>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl std::fmt::Debug for RecordingProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingProcessRunner").finish_non_exhaustive()
    }
}

impl RecordingProcessRunner {
    /// Create a runner where every command succeeds instantly
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every command whose argv contains `word`
    pub fn fail_when_contains(&self, word: &str) {
        self.fail_on.lock().unwrap().push(word.to_string());
    }

    /// Make commands whose argv contains `word` take `delay`
    pub fn delay_when_contains(&self, word: &str, delay: Duration) {
        self.delay.lock().unwrap().insert(word.to_string(), delay);
    }

    /// Every argv run so far, in call order
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of commands observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProcessRunner for RecordingProcessRunner {
    async fn run(&self, argv: &[String]) -> Result<(), CollaboratorError> {
        self.calls.lock().unwrap().push(argv.to_vec());

        let mentions = |word: &String| argv.iter().any(|a| a.contains(word.as_str()));
        let delay = self
            .delay
            .lock()
            .unwrap()
            .iter()
            .find(|&(word, _)| mentions(word))
            .map(|(_, d)| *d);
        let fails = self.fail_on.lock().unwrap().iter().any(mentions);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if fails {
            Err(format!("{} exited with status 1", argv.join(" ")).into())
        } else {
            Ok(())
        }
    }
}

/// Remote runner answering from per-command scripts.
///
/// Unscripted commands succeed with empty output.
#[derive(Clone, Default)]
pub struct ScriptedRemoteRunner {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    calls: Arc<Mutex<Vec<(std::net::SocketAddr, String)>>>,
}

impl std::fmt::Debug for ScriptedRemoteRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRemoteRunner").finish_non_exhaustive()
    }
}

impl ScriptedRemoteRunner {
    /// Create a runner where every command succeeds with empty output
    pub fn new() -> Self {
        Self::default()
    }

    /// Script successive results of `command`
    pub fn script(&self, command: &str, answers: Vec<Result<String, String>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(command.to_string(), answers.into());
    }

    /// Every `(address, command)` run so far
    pub fn calls(&self) -> Vec<(std::net::SocketAddr, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RemoteRunner for ScriptedRemoteRunner {
    async fn run_remote(&self, conn: &ConnectionInfo, command: &str) -> Result<String, CollaboratorError> {
        self.calls
            .lock()
            .unwrap()
            .push((conn.address, command.to_string()));
        match self.scripts.lock().unwrap().get_mut(command) {
            Some(script) => next_answer(script).map_err(Into::into),
            None => Ok(String::new()),
        }
    }
}

/// Identity allocator keeping registrations in memory.
///
/// Node `i` gets MAC `52:54:00:00:01:<i>` and IP `192.168.122.<10 + i>`.
#[derive(Clone, Default)]
pub struct InMemoryIdentityAllocator {
    nodes: Arc<Mutex<HashMap<String, NodeNetConfig>>>,
    registrations: Arc<Mutex<Vec<String>>>,
}

impl std::fmt::Debug for InMemoryIdentityAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryIdentityAllocator").finish_non_exhaustive()
    }
}

impl InMemoryIdentityAllocator {
    /// Create an allocator with no registered nodes
    pub fn new() -> Self {
        Self::default()
    }

    /// Hostnames in registration order
    pub fn registrations(&self) -> Vec<String> {
        self.registrations.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IdentityAllocator for InMemoryIdentityAllocator {
    fn hostname_for(&self, root: &str, index: u32) -> String {
        format!("{root}-{index:03}")
    }

    async fn register_node(&self, hostname: &str, index: u32) -> Result<(), CollaboratorError> {
        let octet = u8::try_from(index)
            .ok()
            .and_then(|i| i.checked_add(10))
            .ok_or_else(|| format!("node index {index} out of range"))?;
        self.nodes.lock().unwrap().insert(
            hostname.to_string(),
            NodeNetConfig {
                hostname: hostname.to_string(),
                mac: format!("52:54:00:00:01:{index:02x}"),
                ip: IpAddr::V4(Ipv4Addr::new(192, 168, 122, octet)),
            },
        );
        self.registrations.lock().unwrap().push(hostname.to_string());
        Ok(())
    }

    async fn lookup(&self, hostname: &str) -> Result<NodeNetConfig, CollaboratorError> {
        self.nodes
            .lock()
            .unwrap()
            .get(hostname)
            .cloned()
            .ok_or_else(|| format!("host {hostname} not registered").into())
    }
}

/// File fetcher answering from per-URL scripts and recording downloads.
///
/// Unscripted URLs fail like an unreachable server.
#[derive(Clone, Default)]
pub struct ScriptedFileFetcher {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    calls: Arc<Mutex<Vec<(String, PathBuf)>>>,
}

impl std::fmt::Debug for ScriptedFileFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedFileFetcher").finish_non_exhaustive()
    }
}

impl ScriptedFileFetcher {
    /// Create a fetcher where every URL is unreachable
    pub fn new() -> Self {
        Self::default()
    }

    /// Script successive results for `url`; `Ok` carries the body
    pub fn script(&self, url: &str, answers: Vec<Result<String, String>>) {
        self.scripts.lock().unwrap().insert(url.to_string(), answers.into());
    }

    /// Every `(url, destination)` requested so far
    pub fn calls(&self) -> Vec<(String, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl FileFetcher for ScriptedFileFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, CollaboratorError> {
        self.calls.lock().unwrap().push((url.to_string(), dest.to_path_buf()));
        match self.scripts.lock().unwrap().get_mut(url) {
            Some(script) => next_answer(script)
                .map(|body| u64::try_from(body.len()).unwrap_or(u64::MAX))
                .map_err(Into::into),
            None => Err(format!("GET {url}: connection refused").into()),
        }
    }
}

/// Boot script configurator reporting a fixed number of scripts.
#[derive(Clone, Default)]
pub struct RecordingBootScriptConfigurator {
    scripts: Arc<AtomicUsize>,
    servers: Arc<Mutex<Vec<String>>>,
}

impl std::fmt::Debug for RecordingBootScriptConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingBootScriptConfigurator").finish_non_exhaustive()
    }
}

impl RecordingBootScriptConfigurator {
    /// Configurator that finds no boot script
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scripts reported as configured by later calls
    pub fn set_scripts(&self, count: usize) {
        self.scripts.store(count, Ordering::SeqCst);
    }

    /// HTTP servers passed to `configure` so far
    pub fn servers(&self) -> Vec<String> {
        self.servers.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl BootScriptConfigurator for RecordingBootScriptConfigurator {
    async fn configure(&self, http_server: &str) -> Result<usize, CollaboratorError> {
        self.servers.lock().unwrap().push(http_server.to_string());
        Ok(self.scripts.load(Ordering::SeqCst))
    }
}
