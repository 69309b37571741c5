//! Integration tests for host tools
//!
//! These tests require a reachable management cluster and a libvirt host.
//! Set KUBECONFIG, CLUSTER_NS and NODE_ADDRESS environment variables to run.

use convergence::{ConnectionInfo, RemoteRunner, ResourceKind, StatusAccessor};
use host_tools::{KubeStatusAccessor, KubectlStatusAccessor, SshRunner};

fn namespace() -> String {
    std::env::var("CLUSTER_NS").unwrap_or_else(|_| "default".to_string())
}

#[tokio::test]
#[ignore] // Requires a management cluster
async fn test_kubectl_lists_clusters() {
    let names = KubectlStatusAccessor::new()
        .list_names(&namespace(), ResourceKind::Cluster)
        .await
        .expect("Failed to list clusters");

    println!("Found {} clusters", names.len());
}

#[tokio::test]
#[ignore] // Requires a management cluster
async fn test_kube_and_kubectl_agree() {
    let kube = KubeStatusAccessor::try_default().await.expect("Failed to create client");
    let kubectl = KubectlStatusAccessor::new();

    let from_kube = kube
        .list_names(&namespace(), ResourceKind::ElementalHost)
        .await
        .expect("Failed to list hosts through kube");
    let mut from_kubectl = kubectl
        .list_names(&namespace(), ResourceKind::ElementalHost)
        .await
        .expect("Failed to list hosts through kubectl");
    from_kubectl.sort();
    let mut from_kube = from_kube;
    from_kube.sort();

    assert_eq!(from_kube, from_kubectl);
}

#[tokio::test]
#[ignore] // Requires a running node
async fn test_ssh_echo() {
    let address = std::env::var("NODE_ADDRESS")
        .expect("NODE_ADDRESS environment variable must be set")
        .parse()
        .expect("NODE_ADDRESS must be ip:port");
    let conn = ConnectionInfo {
        address,
        username: std::env::var("NODE_USER").unwrap_or_else(|_| "root".to_string()),
        password: std::env::var("NODE_PASSWORD").ok(),
    };

    let out = SshRunner::new()
        .run_remote(&conn, "echo SSH_OK")
        .await
        .expect("SSH command failed");
    assert_eq!(out.trim(), "SSH_OK");
}
