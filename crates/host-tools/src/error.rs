//! Host tool errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the real collaborators
#[derive(Debug, Error)]
pub enum HostToolError {
    /// Spawning a process or touching a file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A command ran but exited unsuccessfully
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        /// Program name (argv[0])
        program: String,
        /// Exit status as reported by the OS
        status: String,
        /// Trimmed standard error
        stderr: String,
    },

    /// Empty argv
    #[error("empty command line")]
    EmptyCommand,

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP request or status error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network definition file is not what we expect
    #[error("invalid network file {}: {reason}", path.display())]
    NetworkFile {
        /// File path
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// Host not declared in the network definition
    #[error("host {0} not found in network definition")]
    NodeNotFound(String),

    /// Node index cannot be mapped to an address
    #[error("node index {0} out of range")]
    IndexOutOfRange(u32),
}
