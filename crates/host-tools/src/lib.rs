//! Host tools
//!
//! Real implementations of the convergence collaborator traits:
//!
//! - [`KubectlStatusAccessor`]: `kubectl get -o jsonpath=...`
//! - [`KubeStatusAccessor`]: kube-rs `DynamicObject` reads
//! - [`SshRunner`]: system `ssh`, with `sshpass` for password logins
//! - [`LocalProcessRunner`]: `tokio::process`
//! - [`HttpFileFetcher`]: reqwest downloads to local files
//! - [`IpxeScriptConfigurator`]: points iPXE scripts at the boot HTTP server
//! - [`NetFileAllocator`]: static DHCP entries in a libvirt network file

pub mod download;
pub mod error;
pub mod ipxe;
pub mod kube_status;
pub mod kubectl;
pub mod netfile;
pub mod process;
pub mod ssh;

pub use download::HttpFileFetcher;
pub use error::HostToolError;
pub use ipxe::IpxeScriptConfigurator;
pub use kube_status::KubeStatusAccessor;
pub use kubectl::KubectlStatusAccessor;
pub use netfile::{HostEntry, NetFileAllocator};
pub use process::LocalProcessRunner;
pub use ssh::SshRunner;
