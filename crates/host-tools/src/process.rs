//! Local process execution on `tokio::process`.

use crate::error::HostToolError;
use async_trait::async_trait;
use convergence::{CollaboratorError, ProcessRunner};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Run `argv`, returning stdout on success.
///
/// Stdin is closed so tools never wait for interactive input.
pub(crate) async fn capture(argv: &[String]) -> Result<String, HostToolError> {
    capture_with_env(argv, &[]).await
}

/// Same as [`capture`] with extra environment variables (kept off the argv).
pub(crate) async fn capture_with_env(argv: &[String], env: &[(&str, &str)]) -> Result<String, HostToolError> {
    let (program, args) = argv.split_first().ok_or(HostToolError::EmptyCommand)?;
    debug!(%program, args = args.len(), "Running command");

    let output = Command::new(program)
        .args(args)
        .envs(env.iter().copied())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(HostToolError::CommandFailed {
            program: program.clone(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Runs local programs, optionally from a fixed working directory.
#[derive(Debug, Clone, Default)]
pub struct LocalProcessRunner {
    workdir: Option<PathBuf>,
}

impl LocalProcessRunner {
    /// Runner using the current working directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner spawning every command from `dir`
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: Some(dir.into()),
        }
    }

    async fn run_checked(&self, argv: &[String]) -> Result<(), HostToolError> {
        let (program, args) = argv.split_first().ok_or(HostToolError::EmptyCommand)?;
        debug!(%program, ?args, "Running local command");

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        let output = cmd.output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(HostToolError::CommandFailed {
                program: program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl ProcessRunner for LocalProcessRunner {
    async fn run(&self, argv: &[String]) -> Result<(), CollaboratorError> {
        Ok(self.run_checked(argv).await?)
    }
}
