//! Run configuration from environment variables.
//!
//! Empty variables count as unset.

use crate::error::RunnerError;
use convergence::{NodeRange, PacingPolicy, DEFAULT_MAX_IN_FLIGHT};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which status accessor implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    /// Shell out to `kubectl`
    Kubectl,
    /// kube-rs client
    Kube,
}

impl FromStr for AccessorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kubectl" => Ok(Self::Kubectl),
            "kube" => Ok(Self::Kube),
            other => Err(format!("expected kubectl or kube, got {other}")),
        }
    }
}

/// Everything a bootstrap run needs to know.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// CAPI cluster name
    pub cluster_name: String,
    /// Namespace of the cluster, hosts and machines
    pub cluster_namespace: String,
    /// Namespace of the registration
    pub registration_namespace: String,
    /// First node index
    pub vm_index: u32,
    /// Last node index (inclusive)
    pub vm_numbers: u32,
    /// `vm_index..=vm_numbers`
    pub node_range: NodeRange,
    /// Nodes run with an emulated TPM (no `/dev/tpm0`)
    pub emulate_tpm: bool,
    /// Nodes boot from ISO; no registration check
    pub iso_boot: bool,
    /// libvirt network definition holding node identities
    pub net_default_file: PathBuf,
    /// HTTP server network-booted nodes fetch their artifacts from
    pub http_server: String,
    /// Where the registration install config is saved
    pub install_config_yaml: PathBuf,
    /// Directory of the iPXE scripts pointed at `http_server`
    pub ipxe_script_dir: PathBuf,
    /// Script called as `<script> <hostname> <mac>`
    pub install_vm_script: PathBuf,
    /// Hostname prefix
    pub vm_name_root: String,
    /// SSH user
    pub node_user: String,
    /// SSH password; `NODE_PASSWORD=-` selects key-based login (`None`)
    pub node_password: Option<String>,
    /// Launch pacing
    pub pacing: PacingPolicy,
    /// Deadline multiplier
    pub timeout_scale: u32,
    /// Hard limit for the whole run
    pub suite_timeout: Option<Duration>,
    /// Status accessor implementation
    pub status_accessor: AccessorKind,
}

impl RunConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, RunnerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RunnerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let cluster_name = var("CLUSTER_NAME")
            .ok_or_else(|| RunnerError::InvalidConfig("CLUSTER_NAME environment variable is required".to_string()))?;
        let vm_index = parse_or(&var, "VM_INDEX", 0u32)?;
        let vm_numbers = parse_or(&var, "VM_NUMBERS", vm_index)?;
        if vm_numbers < vm_index {
            return Err(RunnerError::InvalidConfig(format!(
                "VM_NUMBERS ({vm_numbers}) must not be lower than VM_INDEX ({vm_index})"
            )));
        }
        let node_range = NodeRange::new(vm_index, vm_numbers)
            .map_err(|e| RunnerError::invalid("VM_NUMBERS", &vm_numbers.to_string(), e))?;

        let defaults = PacingPolicy::default();
        let pacing = PacingPolicy {
            max_in_flight: positive(&var, "MAX_CONCURRENT_NODES", DEFAULT_MAX_IN_FLIGHT)?,
            stagger: Duration::from_secs(parse_or(&var, "NODE_STAGGER_SECONDS", defaults.stagger.as_secs())?),
            batch_size: positive(&var, "NODE_BATCH_SIZE", defaults.batch_size)?,
            batch_pause: Duration::from_secs(parse_or(
                &var,
                "NODE_BATCH_PAUSE_SECONDS",
                defaults.batch_pause.as_secs(),
            )?),
        };

        let suite_timeout = match var("SUITE_TIMEOUT_MINUTES") {
            Some(raw) => {
                let minutes: u64 = raw
                    .parse()
                    .map_err(|e| RunnerError::invalid("SUITE_TIMEOUT_MINUTES", &raw, e))?;
                if minutes == 0 {
                    return Err(RunnerError::invalid("SUITE_TIMEOUT_MINUTES", &raw, "must be at least 1"));
                }
                Some(Duration::from_secs(minutes * 60))
            }
            None => None,
        };

        let status_accessor = match var("STATUS_ACCESSOR") {
            Some(raw) => raw
                .parse()
                .map_err(|e: String| RunnerError::invalid("STATUS_ACCESSOR", &raw, e))?,
            None => AccessorKind::Kubectl,
        };

        Ok(Self {
            cluster_name,
            cluster_namespace: var("CLUSTER_NS").unwrap_or_else(|| "default".to_string()),
            registration_namespace: var("REGISTRATION_NS").unwrap_or_else(|| "default".to_string()),
            vm_index,
            vm_numbers,
            node_range,
            emulate_tpm: var("EMULATE_TPM").as_deref() == Some("true"),
            iso_boot: var("BOOT_TYPE").as_deref() == Some("iso"),
            net_default_file: var("NET_DEFAULT_FILE")
                .unwrap_or_else(|| "../assets/net-default-capi.xml".to_string())
                .into(),
            http_server: var("HTTP_SERVER").unwrap_or_else(|| "http://192.168.122.1:8000".to_string()),
            install_config_yaml: var("INSTALL_CONFIG_YAML")
                .unwrap_or_else(|| "../../install-config.yaml".to_string())
                .into(),
            ipxe_script_dir: var("IPXE_SCRIPT_DIR").unwrap_or_else(|| "../..".to_string()).into(),
            install_vm_script: var("INSTALL_VM_SCRIPT")
                .unwrap_or_else(|| "../scripts/install-vm".to_string())
                .into(),
            vm_name_root: var("VM_NAME_ROOT").unwrap_or_else(|| "node".to_string()),
            node_user: var("NODE_USER").unwrap_or_else(|| "root".to_string()),
            node_password: match var("NODE_PASSWORD") {
                Some(raw) if raw == "-" => None,
                Some(raw) => Some(raw),
                None => Some("r0s@pwd1".to_string()),
            },
            pacing,
            timeout_scale: positive(&var, "TIMEOUT_SCALE", 1u32)?,
            suite_timeout,
            status_accessor,
        })
    }

    /// Number of nodes under test
    #[must_use]
    pub fn used_nodes(&self) -> u32 {
        self.node_range.len()
    }

    /// Name of the registration the nodes register against
    #[must_use]
    pub fn registration_name(&self) -> String {
        format!("machine-registration-master-{}", self.cluster_name)
    }
}

fn parse_or<T, V>(var: &V, key: &str, default: T) -> Result<T, RunnerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|e| RunnerError::invalid(key, &raw, e)),
        None => Ok(default),
    }
}

fn positive<T, V>(var: &V, key: &str, default: T) -> Result<T, RunnerError>
where
    T: FromStr + PartialEq + Default + std::fmt::Display,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    let value = parse_or(var, key, default)?;
    if value == T::default() {
        return Err(RunnerError::invalid(key, &value.to_string(), "must be greater than zero"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<RunConfig, RunnerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RunConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("CLUSTER_NAME", "hardened")]).unwrap();
        assert_eq!(config.cluster_namespace, "default");
        assert_eq!(config.vm_index, 0);
        assert_eq!(config.vm_numbers, 0);
        assert_eq!(config.used_nodes(), 1);
        assert_eq!(config.vm_name_root, "node");
        assert_eq!(config.node_user, "root");
        assert_eq!(config.node_password.as_deref(), Some("r0s@pwd1"));
        assert_eq!(config.pacing, PacingPolicy::default());
        assert_eq!(config.timeout_scale, 1);
        assert_eq!(config.status_accessor, AccessorKind::Kubectl);
        assert!(!config.emulate_tpm);
        assert!(!config.iso_boot);
        assert!(config.suite_timeout.is_none());
        assert_eq!(config.http_server, "http://192.168.122.1:8000");
        assert_eq!(config.install_config_yaml, PathBuf::from("../../install-config.yaml"));
        assert_eq!(config.ipxe_script_dir, PathBuf::from("../.."));
        assert_eq!(config.registration_name(), "machine-registration-master-hardened");
    }

    #[test]
    fn test_cluster_name_required() {
        assert!(matches!(load(&[]), Err(RunnerError::InvalidConfig(_))));
        assert!(load(&[("CLUSTER_NAME", "")]).is_err());
    }

    #[test]
    fn test_vm_numbers_defaults_to_index() {
        let config = load(&[("CLUSTER_NAME", "c"), ("VM_INDEX", "3")]).unwrap();
        assert_eq!(config.node_range, NodeRange::new(3, 3).unwrap());

        let config = load(&[("CLUSTER_NAME", "c"), ("VM_INDEX", "1"), ("VM_NUMBERS", "5")]).unwrap();
        assert_eq!(config.used_nodes(), 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(load(&[("CLUSTER_NAME", "c"), ("VM_INDEX", "two")]).is_err());
        assert!(load(&[("CLUSTER_NAME", "c"), ("VM_INDEX", "4"), ("VM_NUMBERS", "2")]).is_err());
        assert!(load(&[("CLUSTER_NAME", "c"), ("VM_INDEX", "0"), ("VM_NUMBERS", "4294967295")]).is_err());
        assert!(load(&[("CLUSTER_NAME", "c"), ("MAX_CONCURRENT_NODES", "0")]).is_err());
        assert!(load(&[("CLUSTER_NAME", "c"), ("TIMEOUT_SCALE", "0")]).is_err());
        assert!(load(&[("CLUSTER_NAME", "c"), ("SUITE_TIMEOUT_MINUTES", "0")]).is_err());
        assert!(load(&[("CLUSTER_NAME", "c"), ("STATUS_ACCESSOR", "curl")]).is_err());
    }

    #[test]
    fn test_password_opt_out_selects_key_login() {
        let config = load(&[("CLUSTER_NAME", "c"), ("NODE_PASSWORD", "-")]).unwrap();
        assert_eq!(config.node_password, None);

        let config = load(&[("CLUSTER_NAME", "c"), ("NODE_PASSWORD", "s3cret")]).unwrap();
        assert_eq!(config.node_password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_flags_only_accept_exact_values() {
        let config = load(&[("CLUSTER_NAME", "c"), ("EMULATE_TPM", "true"), ("BOOT_TYPE", "iso")]).unwrap();
        assert!(config.emulate_tpm);
        assert!(config.iso_boot);

        let config = load(&[("CLUSTER_NAME", "c"), ("EMULATE_TPM", "yes"), ("BOOT_TYPE", "pxe")]).unwrap();
        assert!(!config.emulate_tpm);
        assert!(!config.iso_boot);
    }

    #[test]
    fn test_pacing_and_timeouts_overridable() {
        let config = load(&[
            ("CLUSTER_NAME", "c"),
            ("MAX_CONCURRENT_NODES", "4"),
            ("NODE_STAGGER_SECONDS", "0"),
            ("NODE_BATCH_SIZE", "2"),
            ("NODE_BATCH_PAUSE_SECONDS", "30"),
            ("TIMEOUT_SCALE", "2"),
            ("SUITE_TIMEOUT_MINUTES", "90"),
            ("STATUS_ACCESSOR", "kube"),
        ])
        .unwrap();
        assert_eq!(config.pacing.max_in_flight, 4);
        assert_eq!(config.pacing.stagger, Duration::ZERO);
        assert_eq!(config.pacing.batch_size, 2);
        assert_eq!(config.pacing.batch_pause, Duration::from_secs(30));
        assert_eq!(config.timeout_scale, 2);
        assert_eq!(config.suite_timeout, Some(Duration::from_secs(5400)));
        assert_eq!(config.status_accessor, AccessorKind::Kube);
    }
}
