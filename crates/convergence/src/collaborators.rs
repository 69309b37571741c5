//! Collaborator traits
//!
//! The engine never talks to kubectl, SSH, HTTP or the hypervisor directly.
//! It goes through these traits so the real tools (see the `host-tools`
//! crate) and the scripted test doubles are interchangeable.
//! All async methods must be `Send` to work with Tokio's work-stealing runtime.

use crate::readiness::{FieldPath, ResourceKind};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

/// Boxed error returned by collaborators
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Reads fields of cluster resources.
#[async_trait::async_trait]
pub trait StatusAccessor: Send + Sync {
    /// Read one field of a named resource, rendered as text
    ///
    /// A field that exists but is unset reads as an empty string.
    async fn get_field(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        path: &FieldPath,
    ) -> Result<String, CollaboratorError>;

    /// Names of all resources of `kind` in `namespace`
    async fn list_names(&self, namespace: &str, kind: ResourceKind) -> Result<Vec<String>, CollaboratorError>;
}

/// How to reach a node over SSH
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// `ip:port`
    pub address: SocketAddr,
    /// Login user
    pub username: String,
    /// Login password, if password authentication is used
    pub password: Option<String>,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Runs commands on a node.
#[async_trait::async_trait]
pub trait RemoteRunner: Send + Sync {
    /// Run `command` remotely, returning its standard output
    async fn run_remote(&self, conn: &ConnectionInfo, command: &str) -> Result<String, CollaboratorError>;
}

/// Runs local programs (provisioning scripts, hypervisor commands).
#[async_trait::async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `argv[0]` with the remaining arguments; non-zero exit is an error
    async fn run(&self, argv: &[String]) -> Result<(), CollaboratorError>;
}

/// Network identity of a registered node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeNetConfig {
    /// Node hostname
    pub hostname: String,
    /// MAC address assigned at registration
    pub mac: String,
    /// IP address reserved for the MAC
    pub ip: std::net::IpAddr,
}

/// Allocates hostnames and network identities for nodes.
///
/// `register_node` mutates shared configuration and is only ever called from
/// the sequential part of the provisioning loop.
#[async_trait::async_trait]
pub trait IdentityAllocator: Send + Sync {
    /// Hostname for node `index` under `root`
    fn hostname_for(&self, root: &str, index: u32) -> String;

    /// Register `hostname` in the network configuration
    async fn register_node(&self, hostname: &str, index: u32) -> Result<(), CollaboratorError>;

    /// Look up the network identity of a registered node
    async fn lookup(&self, hostname: &str) -> Result<NodeNetConfig, CollaboratorError>;
}

/// Downloads files over HTTP(S).
#[async_trait::async_trait]
pub trait FileFetcher: Send + Sync {
    /// Save the body of `url` to `dest`, returning the number of bytes written
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, CollaboratorError>;
}

/// Points network boot scripts at the HTTP server serving install media.
#[async_trait::async_trait]
pub trait BootScriptConfigurator: Send + Sync {
    /// Rewrite every boot script for `http_server`; returns how many were configured
    async fn configure(&self, http_server: &str) -> Result<usize, CollaboratorError>;
}
