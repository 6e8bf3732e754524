use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, ObjectMeta};

use kube_sentry::k8s::{HostPolicyStream, K8sClient, PodStream, PolicyStream};

/// Builds a minimal watched `Pod` with one container, optional
/// ReplicaSet owner reference, and the given labels/annotations.
pub fn make_test_pod(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
    annotations: &[(&str, &str)],
    containers: &[(&str, &str)],
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            annotations: Some(annotations.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|(_, cname)| Container {
                    name: cname.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        status: Some(PodStatus {
            container_statuses: Some(
                containers
                    .iter()
                    .map(|(cid, cname)| ContainerStatus {
                        name: cname.to_string(),
                        container_id: Some(cid.to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
    }
}

/// Attaches a ReplicaSet owner reference so `resolve_deployment` has
/// something to traverse.
pub fn with_replicaset_owner(mut pod: Pod, rs_name: &str) -> Pod {
    pod.metadata.owner_references = Some(vec![OwnerReference {
        kind: "ReplicaSet".to_string(),
        name: rs_name.to_string(),
        api_version: "apps/v1".to_string(),
        uid: "rs-uid".to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]);
    pod
}

/// A `K8sClient` double for tests: no watch streams (the reconciler is
/// driven directly with decoded events), canned deployment/node lookups,
/// and recorded patch calls.
#[derive(Default)]
pub struct FakeK8sClient {
    pub deployment_name: Option<String>,
    pub node_identities: Vec<String>,
    pub apparmor_patches: Mutex<Vec<(String, String, BTreeMap<String, String>)>>,
    pub selinux_patches: Mutex<Vec<(String, String, BTreeMap<String, String>)>>,
}

impl FakeK8sClient {
    pub fn with_deployment(name: &str) -> Self {
        Self {
            deployment_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_node_identities(identities: &[&str]) -> Self {
        Self {
            node_identities: identities.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl K8sClient for FakeK8sClient {
    async fn watch_pods(&self) -> anyhow::Result<PodStream> {
        unimplemented!("integration tests drive the reconciler directly")
    }
    async fn watch_security_policies(&self) -> anyhow::Result<PolicyStream> {
        unimplemented!("integration tests drive the reconciler directly")
    }
    async fn watch_host_security_policies(&self) -> anyhow::Result<HostPolicyStream> {
        unimplemented!("integration tests drive the reconciler directly")
    }

    async fn check_custom_resource_definition(&self, _kind: &str) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn get_deployment_name_controlling_replica_set(
        &self,
        _namespace: &str,
        _replica_set: &str,
    ) -> anyhow::Result<Option<String>> {
        Ok(self.deployment_name.clone())
    }

    async fn get_node_identities(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.node_identities.clone())
    }

    async fn patch_deployment_with_apparmor_annotations(
        &self,
        namespace: &str,
        deployment: &str,
        profiles: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        self.apparmor_patches
            .lock()
            .unwrap()
            .push((namespace.to_string(), deployment.to_string(), profiles.clone()));
        Ok(())
    }

    async fn patch_deployment_with_selinux_options(
        &self,
        namespace: &str,
        deployment: &str,
        selinux_types: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        self.selinux_patches
            .lock()
            .unwrap()
            .push((namespace.to_string(), deployment.to_string(), selinux_types.clone()));
        Ok(())
    }
}
