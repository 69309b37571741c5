//! Resource readiness matrix.
//!
//! Each resource kind the bootstrap flow waits on has a fixed list of status
//! conditions that must all reach their target value. The list order only
//! matters for diagnostics: every condition is checked, and the first one
//! that fails to converge fails the whole readiness check.

use crate::budget::ResourceClass;
use crate::collaborators::StatusAccessor;
use crate::error::ConvergenceError;
use crate::poller::Poller;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::info;

static SHARED_MATRIX: LazyLock<ReadinessMatrix> = LazyLock::new(ReadinessMatrix::default);

/// Kinds of management-cluster resources the runner looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// CAPI `Cluster`
    Cluster,
    /// Elemental `ElementalHost`
    ElementalHost,
    /// Elemental `ElementalMachine`
    ElementalMachine,
    /// Elemental `ElementalRegistration` (listed, never waited on for readiness)
    ElementalRegistration,
    /// Elemental operator `MachineRegistration` (read for its registration URL)
    MachineRegistration,
}

impl ResourceKind {
    /// Resource name as understood by `kubectl get`
    #[must_use]
    pub fn kubectl_name(self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::ElementalHost => "elementalhost",
            Self::ElementalMachine => "elementalmachine",
            Self::ElementalRegistration => "elementalregistration",
            Self::MachineRegistration => "machineregistration",
        }
    }

    /// API group and version
    #[must_use]
    pub fn api_version(self) -> (&'static str, &'static str) {
        match self {
            Self::Cluster => ("cluster.x-k8s.io", "v1beta1"),
            Self::ElementalHost | Self::ElementalMachine | Self::ElementalRegistration => {
                ("infrastructure.cluster.x-k8s.io", "v1beta1")
            }
            Self::MachineRegistration => ("elemental.cattle.io", "v1beta1"),
        }
    }

    /// Kubernetes `kind`
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Cluster => "Cluster",
            Self::ElementalHost => "ElementalHost",
            Self::ElementalMachine => "ElementalMachine",
            Self::ElementalRegistration => "ElementalRegistration",
            Self::MachineRegistration => "MachineRegistration",
        }
    }

    /// Plural resource name used in API paths
    #[must_use]
    pub fn plural(self) -> &'static str {
        match self {
            Self::Cluster => "clusters",
            Self::ElementalHost => "elementalhosts",
            Self::ElementalMachine => "elementalmachines",
            Self::ElementalRegistration => "elementalregistrations",
            Self::MachineRegistration => "machineregistrations",
        }
    }

    /// Poll class used when waiting on this kind's conditions
    #[must_use]
    pub fn poll_class(self) -> ResourceClass {
        match self {
            Self::Cluster => ResourceClass::ClusterStatus,
            Self::ElementalHost | Self::ElementalMachine => ResourceClass::ElementalStatus,
            Self::ElementalRegistration | Self::MachineRegistration => ResourceClass::Registration,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kubectl_name())
    }
}

impl FromStr for ResourceKind {
    type Err = ConvergenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cluster" => Ok(Self::Cluster),
            "elementalhost" | "elemental-host" => Ok(Self::ElementalHost),
            "elementalmachine" | "elemental-machine" => Ok(Self::ElementalMachine),
            "elementalregistration" | "elemental-registration" => Ok(Self::ElementalRegistration),
            "machineregistration" | "machine-registration" => Ok(Self::MachineRegistration),
            _ => Err(ConvergenceError::UnknownResourceKind(s.to_string())),
        }
    }
}

/// Where a value lives inside a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldPath {
    /// `.status.<name>`
    StatusField(String),
    /// `.status` of the entry in `.status.conditions` with the given type
    ConditionStatus(String),
}

impl FieldPath {
    /// kubectl `-o jsonpath=` expression
    #[must_use]
    pub fn to_jsonpath(&self) -> String {
        match self {
            Self::StatusField(name) => format!("{{.status.{name}}}"),
            Self::ConditionStatus(ty) => {
                format!("{{.status.conditions[?(@.type==\"{ty}\")].status}}")
            }
        }
    }

    /// Evaluate against a resource's JSON, rendered the way kubectl would
    ///
    /// Missing fields render as an empty string.
    #[must_use]
    pub fn extract(&self, object: &serde_json::Value) -> String {
        let status = object.get("status");
        let value = match self {
            Self::StatusField(name) => status.and_then(|s| s.get(name)),
            Self::ConditionStatus(ty) => status
                .and_then(|s| s.get("conditions"))
                .and_then(serde_json::Value::as_array)
                .and_then(|conditions| {
                    conditions
                        .iter()
                        .find(|c| c.get("type").and_then(serde_json::Value::as_str) == Some(ty))
                })
                .and_then(|c| c.get("status")),
        };
        match value {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// One condition a resource must reach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionSpec {
    /// Condition type (or status field) name
    pub condition: String,
    /// Field holding the condition's value
    pub path: FieldPath,
    /// Expected value
    pub expected: String,
}

impl ConditionSpec {
    fn status_field(name: &str, expected: &str) -> Self {
        Self {
            condition: name.to_string(),
            path: FieldPath::StatusField(name.to_string()),
            expected: expected.to_string(),
        }
    }

    fn condition(ty: &str, expected: &str) -> Self {
        Self {
            condition: ty.to_string(),
            path: FieldPath::ConditionStatus(ty.to_string()),
            expected: expected.to_string(),
        }
    }
}

/// A specific resource instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Resource kind
    pub kind: ResourceKind,
    /// Namespace
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceRef {
    /// Reference `name` of `kind` in `namespace`
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Required conditions per resource kind.
#[derive(Debug, Clone)]
pub struct ReadinessMatrix {
    cluster: Vec<ConditionSpec>,
    elemental_host: Vec<ConditionSpec>,
    elemental_machine: Vec<ConditionSpec>,
}

impl Default for ReadinessMatrix {
    fn default() -> Self {
        Self {
            cluster: vec![
                ConditionSpec::status_field("controlPlaneReady", "true"),
                ConditionSpec::status_field("infrastructureReady", "true"),
            ],
            elemental_host: ["RegistrationReady", "InstallationReady", "BootstrapReady", "Ready"]
                .into_iter()
                .map(|ty| ConditionSpec::condition(ty, "True"))
                .collect(),
            elemental_machine: ["AssociationReady", "HostReady", "ProviderIDReady", "Ready"]
                .into_iter()
                .map(|ty| ConditionSpec::condition(ty, "True"))
                .collect(),
        }
    }
}

impl ReadinessMatrix {
    /// Process-wide matrix, built on first use and never modified
    #[must_use]
    pub fn shared() -> &'static Self {
        &SHARED_MATRIX
    }

    /// Conditions for `kind`, in diagnostic order
    ///
    /// # Errors
    ///
    /// Kinds without a matrix entry are a driver defect and fail loudly.
    pub fn conditions_for(&self, kind: ResourceKind) -> Result<&[ConditionSpec], ConvergenceError> {
        match kind {
            ResourceKind::Cluster => Ok(&self.cluster),
            ResourceKind::ElementalHost => Ok(&self.elemental_host),
            ResourceKind::ElementalMachine => Ok(&self.elemental_machine),
            ResourceKind::ElementalRegistration | ResourceKind::MachineRegistration => {
                Err(ConvergenceError::NoReadinessConditions(kind.to_string()))
            }
        }
    }

    /// Same as [`Self::conditions_for`], taking the kind by name
    pub fn conditions_for_name(&self, kind: &str) -> Result<&[ConditionSpec], ConvergenceError> {
        self.conditions_for(kind.parse()?)
    }

    /// Wait until every condition of `resource` converges.
    ///
    /// Conditions are polled one after the other with the same poller; the
    /// first one that times out aborts the check.
    pub async fn wait_ready(
        &self,
        accessor: &dyn StatusAccessor,
        poller: &Poller,
        resource: &ResourceRef,
    ) -> Result<(), ConvergenceError> {
        let conditions = self.conditions_for(resource.kind)?;
        info!(%resource, conditions = conditions.len(), "Checking readiness");

        for spec in conditions {
            let what = format!("{resource} {}", spec.condition);
            poller
                .wait_for(&what, spec.expected.clone(), || async move {
                    accessor
                        .get_field(&resource.namespace, resource.kind, &resource.name, &spec.path)
                        .await
                        .map(|v| v.trim().to_string())
                })
                .await?;
            info!(%resource, condition = %spec.condition, expected = %spec.expected, "Condition reached");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::PollBudget;
    use crate::mock::ScriptedStatusAccessor;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn names(specs: &[ConditionSpec]) -> Vec<&str> {
        specs.iter().map(|s| s.condition.as_str()).collect()
    }

    #[test]
    fn test_elemental_host_conditions_in_order() {
        let matrix = ReadinessMatrix::default();
        let specs = matrix.conditions_for_name("elemental-host").unwrap();
        assert_eq!(
            names(specs),
            ["RegistrationReady", "InstallationReady", "BootstrapReady", "Ready"]
        );
        assert!(specs.iter().all(|s| s.expected == "True"));
    }

    #[test]
    fn test_elemental_machine_conditions_in_order() {
        let matrix = ReadinessMatrix::default();
        let specs = matrix.conditions_for(ResourceKind::ElementalMachine).unwrap();
        assert_eq!(names(specs), ["AssociationReady", "HostReady", "ProviderIDReady", "Ready"]);
    }

    #[test]
    fn test_cluster_conditions() {
        let matrix = ReadinessMatrix::default();
        let specs = matrix.conditions_for(ResourceKind::Cluster).unwrap();
        assert_eq!(names(specs), ["controlPlaneReady", "infrastructureReady"]);
        assert!(specs.iter().all(|s| s.expected == "true"));
        assert_eq!(specs[0].path.to_jsonpath(), "{.status.controlPlaneReady}");
    }

    #[test]
    fn test_unknown_kinds_fail_fast() {
        let matrix = ReadinessMatrix::default();
        assert!(matches!(
            matrix.conditions_for_name("elementalwidget"),
            Err(ConvergenceError::UnknownResourceKind(_))
        ));
        assert!(matches!(
            matrix.conditions_for(ResourceKind::ElementalRegistration),
            Err(ConvergenceError::NoReadinessConditions(_))
        ));
        assert!(matches!(
            matrix.conditions_for_name("MachineRegistration"),
            Err(ConvergenceError::NoReadinessConditions(_))
        ));
    }

    #[test]
    fn test_condition_jsonpath() {
        let path = FieldPath::ConditionStatus("Ready".to_string());
        assert_eq!(
            path.to_jsonpath(),
            "{.status.conditions[?(@.type==\"Ready\")].status}"
        );
    }

    #[test]
    fn test_extract_matches_kubectl_rendering() {
        let host = serde_json::json!({
            "status": {
                "controlPlaneReady": true,
                "conditions": [
                    {"type": "RegistrationReady", "status": "True"},
                    {"type": "Ready", "status": "False"}
                ]
            }
        });
        assert_eq!(FieldPath::StatusField("controlPlaneReady".into()).extract(&host), "true");
        assert_eq!(FieldPath::ConditionStatus("Ready".into()).extract(&host), "False");
        assert_eq!(FieldPath::ConditionStatus("HostReady".into()).extract(&host), "");
        assert_eq!(FieldPath::StatusField("missing".into()).extract(&serde_json::json!({})), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_checks_every_condition() {
        let accessor = ScriptedStatusAccessor::new();
        let host = ResourceRef::new(ResourceKind::ElementalHost, "fleet", "node-001");
        for ty in ["RegistrationReady", "InstallationReady", "BootstrapReady", "Ready"] {
            accessor.script_condition(&host, ty, ["False", "True"]);
        }

        let poller = Poller::new(
            PollBudget::new(Duration::from_secs(20), Duration::from_secs(120)).unwrap(),
            CancellationToken::new(),
        );
        ReadinessMatrix::default()
            .wait_ready(&accessor, &poller, &host)
            .await
            .unwrap();

        // each condition: one mismatch, one match
        assert_eq!(accessor.reads(&host), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_fails_on_stuck_condition() {
        let accessor = ScriptedStatusAccessor::new();
        let machine = ResourceRef::new(ResourceKind::ElementalMachine, "fleet", "m-1");
        accessor.script_condition(&machine, "AssociationReady", ["True"]);
        accessor.script_condition(&machine, "HostReady", ["False"]);

        let poller = Poller::new(
            PollBudget::new(Duration::from_secs(20), Duration::from_secs(60)).unwrap(),
            CancellationToken::new(),
        );
        let err = ReadinessMatrix::default()
            .wait_ready(&accessor, &poller, &machine)
            .await
            .unwrap_err();

        match err {
            ConvergenceError::Timeout { what, last_observed, .. } => {
                assert!(what.contains("HostReady"));
                assert!(last_observed.contains("False"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
