//! Remote command runner over the system `ssh` client.
//!
//! Password logins go through `sshpass -e`, so the password travels in the
//! environment instead of the command line.

use crate::process::capture_with_env;
use async_trait::async_trait;
use convergence::{CollaboratorError, ConnectionInfo, RemoteRunner};
use std::time::Duration;

/// Runs commands on nodes with `ssh`.
#[derive(Debug, Clone)]
pub struct SshRunner {
    connect_timeout: Duration,
}

impl Default for SshRunner {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl SshRunner {
    /// Runner with a 10s connect timeout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Command line for running `command` on `conn`.
    ///
    /// Nodes are reinstalled on every run, so host keys are never pinned.
    #[must_use]
    pub fn argv(&self, conn: &ConnectionInfo, command: &str) -> Vec<String> {
        let mut argv = Vec::new();
        if conn.password.is_some() {
            argv.extend(["sshpass".to_string(), "-e".to_string()]);
        }
        argv.push("ssh".to_string());
        if conn.password.is_none() {
            // key-based: fail instead of prompting
            argv.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }
        argv.extend([
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-p".to_string(),
            conn.address.port().to_string(),
            format!("{}@{}", conn.username, conn.address.ip()),
            command.to_string(),
        ]);
        argv
    }
}

#[async_trait]
impl RemoteRunner for SshRunner {
    async fn run_remote(&self, conn: &ConnectionInfo, command: &str) -> Result<String, CollaboratorError> {
        let argv = self.argv(conn, command);
        let out = match &conn.password {
            Some(password) => capture_with_env(&argv, &[("SSHPASS", password.as_str())]).await?,
            None => capture_with_env(&argv, &[]).await?,
        };
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn conn(password: Option<&str>) -> ConnectionInfo {
        ConnectionInfo {
            address: SocketAddr::from(([192, 168, 122, 11], 22)),
            username: "root".to_string(),
            password: password.map(str::to_string),
        }
    }

    #[test]
    fn test_password_login_uses_sshpass_env() {
        let argv = SshRunner::new().argv(&conn(Some("r0s@pwd1")), "echo SSH_OK");
        assert_eq!(&argv[..3], ["sshpass", "-e", "ssh"]);
        assert!(!argv.iter().any(|a| a.contains("r0s@pwd1")));
        assert_eq!(argv[argv.len() - 2], "root@192.168.122.11");
        assert_eq!(argv[argv.len() - 1], "echo SSH_OK");
    }

    #[test]
    fn test_key_login_is_batch_mode() {
        let argv = SshRunner::new()
            .with_connect_timeout(Duration::from_secs(3))
            .argv(&conn(None), "cat /etc/os-release");
        assert_eq!(argv[0], "ssh");
        assert_eq!(&argv[1..3], ["-o", "BatchMode=yes"]);
        assert!(argv.contains(&"ConnectTimeout=3".to_string()));
        assert!(argv.contains(&"22".to_string()));
    }

    #[test]
    fn test_debug_redacts_password() {
        let shown = format!("{:?}", conn(Some("r0s@pwd1")));
        assert!(!shown.contains("r0s@pwd1"));
    }
}
