//! Status accessor shelling out to `kubectl`.

use crate::process::capture;
use async_trait::async_trait;
use convergence::{CollaboratorError, FieldPath, ResourceKind, StatusAccessor};
use std::path::PathBuf;

/// Reads resource fields with `kubectl get -o jsonpath=...`.
#[derive(Debug, Clone)]
pub struct KubectlStatusAccessor {
    binary: String,
    kubeconfig: Option<PathBuf>,
}

impl Default for KubectlStatusAccessor {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
            kubeconfig: None,
        }
    }
}

impl KubectlStatusAccessor {
    /// Use `kubectl` from `PATH` with the ambient kubeconfig
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific binary
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Pass `--kubeconfig` on every call
    #[must_use]
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Command line for reading `path` of `kind/name`
    #[must_use]
    pub fn get_field_argv(&self, namespace: &str, kind: ResourceKind, name: &str, path: &FieldPath) -> Vec<String> {
        let mut argv = self.base_argv();
        argv.extend([
            "get".to_string(),
            kind.kubectl_name().to_string(),
            name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            format!("jsonpath={}", path.to_jsonpath()),
        ]);
        argv
    }

    /// Command line for listing names of `kind`
    #[must_use]
    pub fn list_names_argv(&self, namespace: &str, kind: ResourceKind) -> Vec<String> {
        let mut argv = self.base_argv();
        argv.extend([
            "get".to_string(),
            kind.kubectl_name().to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            "jsonpath={.items[*].metadata.name}".to_string(),
        ]);
        argv
    }

    fn base_argv(&self) -> Vec<String> {
        let mut argv = vec![self.binary.clone()];
        if let Some(path) = &self.kubeconfig {
            argv.push(format!("--kubeconfig={}", path.display()));
        }
        argv
    }
}

#[async_trait]
impl StatusAccessor for KubectlStatusAccessor {
    async fn get_field(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        path: &FieldPath,
    ) -> Result<String, CollaboratorError> {
        let out = capture(&self.get_field_argv(namespace, kind, name, path)).await?;
        Ok(out.trim().to_string())
    }

    async fn list_names(&self, namespace: &str, kind: ResourceKind) -> Result<Vec<String>, CollaboratorError> {
        let out = capture(&self.list_names_argv(namespace, kind)).await?;
        Ok(out.split_whitespace().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_argv() {
        let argv = KubectlStatusAccessor::new().get_field_argv(
            "fleet-default",
            ResourceKind::ElementalHost,
            "node-001",
            &FieldPath::ConditionStatus("Ready".to_string()),
        );
        assert_eq!(
            argv,
            [
                "kubectl",
                "get",
                "elementalhost",
                "node-001",
                "--namespace",
                "fleet-default",
                "-o",
                "jsonpath={.status.conditions[?(@.type==\"Ready\")].status}",
            ]
        );
    }

    #[test]
    fn test_list_argv_with_kubeconfig() {
        let argv = KubectlStatusAccessor::new()
            .with_kubeconfig("/tmp/kubeconfig")
            .list_names_argv("default", ResourceKind::ElementalMachine);
        assert_eq!(argv[1], "--kubeconfig=/tmp/kubeconfig");
        assert_eq!(argv.last().map(String::as_str), Some("jsonpath={.items[*].metadata.name}"));
    }

    #[tokio::test]
    async fn test_reads_through_binary() {
        // `echo` stands in for kubectl and prints its own arguments
        let accessor = KubectlStatusAccessor::new().with_binary("echo");
        let names = accessor
            .list_names("default", ResourceKind::ElementalRegistration)
            .await
            .unwrap();
        assert_eq!(names[0], "get");
        assert!(names.contains(&"elementalregistration".to_string()));
    }
}
