//! Status accessor talking to the API server through kube-rs.
//!
//! Resources are read as `DynamicObject`s so no CRD types are needed; field
//! paths are evaluated the same way `kubectl -o jsonpath` renders them.

use crate::error::HostToolError;
use async_trait::async_trait;
use convergence::{CollaboratorError, FieldPath, ResourceKind, StatusAccessor};
use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

/// Map a resource kind to its API resource description
#[must_use]
pub fn api_resource(kind: ResourceKind) -> ApiResource {
    let (group, version) = kind.api_version();
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: format!("{group}/{version}"),
        kind: kind.kind().to_string(),
        plural: kind.plural().to_string(),
    }
}

/// Reads resource fields with a kube client.
#[derive(Clone)]
pub struct KubeStatusAccessor {
    client: Client,
}

impl std::fmt::Debug for KubeStatusAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStatusAccessor").finish_non_exhaustive()
    }
}

impl KubeStatusAccessor {
    /// Wrap an existing client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client from the ambient kubeconfig or in-cluster environment
    pub async fn try_default() -> Result<Self, HostToolError> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn api(&self, namespace: &str, kind: ResourceKind) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &api_resource(kind))
    }

    async fn read_field(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        path: &FieldPath,
    ) -> Result<String, HostToolError> {
        let object = self.api(namespace, kind).get(name).await?;
        let value = serde_json::to_value(&object)?;
        let field = path.extract(&value);
        debug!(%kind, %namespace, %name, path = %path.to_jsonpath(), %field, "Read field");
        Ok(field)
    }

    async fn read_names(&self, namespace: &str, kind: ResourceKind) -> Result<Vec<String>, HostToolError> {
        let list = self.api(namespace, kind).list(&ListParams::default()).await?;
        Ok(list.items.into_iter().filter_map(|o| o.metadata.name).collect())
    }
}

#[async_trait]
impl StatusAccessor for KubeStatusAccessor {
    async fn get_field(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        path: &FieldPath,
    ) -> Result<String, CollaboratorError> {
        Ok(self.read_field(namespace, kind, name, path).await?)
    }

    async fn list_names(&self, namespace: &str, kind: ResourceKind) -> Result<Vec<String>, CollaboratorError> {
        Ok(self.read_names(namespace, kind).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_resources() {
        let cluster = api_resource(ResourceKind::Cluster);
        assert_eq!(cluster.api_version, "cluster.x-k8s.io/v1beta1");
        assert_eq!(cluster.plural, "clusters");

        let host = api_resource(ResourceKind::ElementalHost);
        assert_eq!(host.group, "infrastructure.cluster.x-k8s.io");
        assert_eq!(host.kind, "ElementalHost");
        assert_eq!(host.plural, "elementalhosts");
    }

    #[test]
    fn test_dynamic_object_field_extraction() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
            "kind": "ElementalMachine",
            "metadata": {"name": "m-1", "namespace": "default"},
            "status": {
                "conditions": [
                    {"type": "AssociationReady", "status": "True"},
                    {"type": "HostReady", "status": "False"}
                ]
            }
        }))
        .unwrap();
        let value = serde_json::to_value(&object).unwrap();

        assert_eq!(FieldPath::ConditionStatus("AssociationReady".into()).extract(&value), "True");
        assert_eq!(FieldPath::ConditionStatus("HostReady".into()).extract(&value), "False");
        assert_eq!(FieldPath::ConditionStatus("Ready".into()).extract(&value), "");
    }
}
