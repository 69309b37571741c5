//! iPXE boot scripts
//!
//! Nodes booted over the network chain-load an iPXE script whose `set url`
//! line names the HTTP server holding the installer artifacts. Before a
//! network-boot run the scripts are rewritten to point at the run's server.

use crate::error::HostToolError;
use async_trait::async_trait;
use convergence::{BootScriptConfigurator, CollaboratorError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SCRIPT_EXTENSION: &str = "ipxe";
const URL_DIRECTIVE: &str = "set url ";

/// Rewrite every `set url` line of `script` to `http_server`
///
/// Returns `None` when the script has no `set url` line.
pub fn set_boot_url(script: &str, http_server: &str) -> Option<String> {
    let server = http_server.trim_end_matches('/');
    let mut found = false;
    let mut out = String::with_capacity(script.len() + server.len());

    for line in script.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        let indent = &body[..body.len() - body.trim_start().len()];
        if body.trim_start().starts_with(URL_DIRECTIVE) {
            found = true;
            out.push_str(indent);
            out.push_str(URL_DIRECTIVE);
            out.push_str(server);
            out.push('/');
            out.push_str(&line[body.len()..]);
        } else {
            out.push_str(line);
        }
    }

    found.then_some(out)
}

/// Rewrites the `*.ipxe` scripts of one directory.
#[derive(Debug, Clone)]
pub struct IpxeScriptConfigurator {
    dir: PathBuf,
}

impl IpxeScriptConfigurator {
    /// Configurator for the scripts in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Script directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Point every script in the directory at `http_server`
    ///
    /// Returns how many scripts were rewritten. Scripts without a `set url`
    /// line are left alone and not counted.
    pub async fn configure_scripts(&self, http_server: &str) -> Result<usize, HostToolError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut scripts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION) {
                scripts.push(path);
            }
        }
        scripts.sort();

        let mut configured = 0;
        for path in scripts {
            let script = tokio::fs::read_to_string(&path).await?;
            match set_boot_url(&script, http_server) {
                Some(updated) => {
                    if updated != script {
                        tokio::fs::write(&path, updated).await?;
                    }
                    debug!(script = %path.display(), "Boot URL set");
                    configured += 1;
                }
                None => debug!(script = %path.display(), "No set url line, skipping"),
            }
        }

        info!(dir = %self.dir.display(), %http_server, configured, "iPXE scripts configured");
        Ok(configured)
    }
}

#[async_trait]
impl BootScriptConfigurator for IpxeScriptConfigurator {
    async fn configure(&self, http_server: &str) -> Result<usize, CollaboratorError> {
        Ok(self.configure_scripts(http_server).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "#!ipxe\nset url http://10.0.0.1:8000/\n  kernel ${url}vmlinuz\nboot\n";

    #[test]
    fn test_set_boot_url_rewrites_directive() {
        let updated = set_boot_url(SCRIPT, "http://192.168.122.1:8000").unwrap();
        assert_eq!(
            updated,
            "#!ipxe\nset url http://192.168.122.1:8000/\n  kernel ${url}vmlinuz\nboot\n"
        );
    }

    #[test]
    fn test_set_boot_url_keeps_indent_and_crlf() {
        let script = "#!ipxe\r\n  set url old\r\nboot";
        let updated = set_boot_url(script, "http://srv:8000/").unwrap();
        assert_eq!(updated, "#!ipxe\r\n  set url http://srv:8000/\r\nboot");
    }

    #[test]
    fn test_set_boot_url_without_directive() {
        assert!(set_boot_url("#!ipxe\nboot\n", "http://srv").is_none());
    }

    #[tokio::test]
    async fn test_configure_counts_rewritten_scripts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ipxe"), SCRIPT).unwrap();
        std::fs::write(dir.path().join("b.ipxe"), "#!ipxe\nboot\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "set url http://other/\n").unwrap();

        let configurator = IpxeScriptConfigurator::new(dir.path());
        let count = configurator.configure("http://192.168.122.1:8000").await.unwrap();

        assert_eq!(count, 1);
        let a = std::fs::read_to_string(dir.path().join("a.ipxe")).unwrap();
        assert!(a.contains("set url http://192.168.122.1:8000/\n"));
        let notes = std::fs::read_to_string(dir.path().join("notes.txt")).unwrap();
        assert_eq!(notes, "set url http://other/\n");
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let configurator = IpxeScriptConfigurator::new(dir.path().join("absent"));
        let err = configurator.configure_scripts("http://srv").await.unwrap_err();
        assert!(matches!(err, HostToolError::Io(_)));
    }
}
