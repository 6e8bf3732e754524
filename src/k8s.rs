//! Orchestrator client boundary — the eight operations the engine consumes
//! from the cluster API, plus the concrete `kube`-backed implementation.
//!
//! [`K8sClient`] is the seam the [`crate::watcher`] loops and
//! [`crate::annotate`] pass call through. Tests substitute a fake
//! implementation; production wires up [`KubeClient`].

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams, WatchEvent, WatchParams};
use kube::Client;

use crate::crd::{HostSecurityPolicy, SecurityPolicy};

/* ============================= EVENT TYPES ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct PodEvent {
    pub kind: EventKind,
    pub pod: Pod,
}

#[derive(Debug, Clone)]
pub struct PolicyEvent {
    pub kind: EventKind,
    pub policy: SecurityPolicy,
}

#[derive(Debug, Clone)]
pub struct HostPolicyEvent {
    pub kind: EventKind,
    pub policy: HostSecurityPolicy,
}

pub type PodStream = Pin<Box<dyn Stream<Item = kube::Result<PodEvent>> + Send>>;
pub type PolicyStream = Pin<Box<dyn Stream<Item = kube::Result<PolicyEvent>> + Send>>;
pub type HostPolicyStream = Pin<Box<dyn Stream<Item = kube::Result<HostPolicyEvent>> + Send>>;

fn map_watch_event<K, T>(event: WatchEvent<K>, wrap: impl Fn(EventKind, K) -> T) -> Option<T> {
    match event {
        WatchEvent::Added(obj) => Some(wrap(EventKind::Added, obj)),
        WatchEvent::Modified(obj) => Some(wrap(EventKind::Modified, obj)),
        WatchEvent::Deleted(obj) => Some(wrap(EventKind::Deleted, obj)),
        WatchEvent::Bookmark(_) | WatchEvent::Error(_) => None,
    }
}

/* ============================= CLIENT TRAIT ============================= */

/// The orchestrator client boundary. Streaming methods open the watch and
/// hand back a stream; the caller (the watcher loop) owns reconnection.
#[async_trait]
pub trait K8sClient: Send + Sync {
    async fn watch_pods(&self) -> anyhow::Result<PodStream>;
    async fn watch_security_policies(&self) -> anyhow::Result<PolicyStream>;
    async fn watch_host_security_policies(&self) -> anyhow::Result<HostPolicyStream>;

    async fn check_custom_resource_definition(&self, kind: &str) -> anyhow::Result<bool>;

    async fn get_deployment_name_controlling_replica_set(
        &self,
        namespace: &str,
        replica_set: &str,
    ) -> anyhow::Result<Option<String>>;

    async fn get_node_identities(&self) -> anyhow::Result<Vec<String>>;

    async fn patch_deployment_with_apparmor_annotations(
        &self,
        namespace: &str,
        deployment: &str,
        profiles: &BTreeMap<String, String>,
    ) -> anyhow::Result<()>;

    async fn patch_deployment_with_selinux_options(
        &self,
        namespace: &str,
        deployment: &str,
        selinux_types: &BTreeMap<String, String>,
    ) -> anyhow::Result<()>;
}

/* ============================= KUBE IMPLEMENTATION ============================= */

pub struct KubeClient {
    client: Client,
    node_name: String,
}

impl KubeClient {
    pub fn new(client: Client, node_name: String) -> Self {
        Self { client, node_name }
    }
}

#[async_trait]
impl K8sClient for KubeClient {
    async fn watch_pods(&self) -> anyhow::Result<PodStream> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let stream = api.watch(&WatchParams::default(), "0").await?;
        Ok(Box::pin(stream.filter_map(|res| async move {
            match res {
                Ok(event) => map_watch_event(event, |kind, pod| Ok(PodEvent { kind, pod })),
                Err(e) => Some(Err(e)),
            }
        })))
    }

    async fn watch_security_policies(&self) -> anyhow::Result<PolicyStream> {
        let api: Api<SecurityPolicy> = Api::all(self.client.clone());
        let stream = api.watch(&WatchParams::default(), "0").await?;
        Ok(Box::pin(stream.filter_map(|res| async move {
            match res {
                Ok(event) => map_watch_event(event, |kind, policy| Ok(PolicyEvent { kind, policy })),
                Err(e) => Some(Err(e)),
            }
        })))
    }

    async fn watch_host_security_policies(&self) -> anyhow::Result<HostPolicyStream> {
        let api: Api<HostSecurityPolicy> = Api::all(self.client.clone());
        let stream = api.watch(&WatchParams::default(), "0").await?;
        Ok(Box::pin(stream.filter_map(|res| async move {
            match res {
                Ok(event) => map_watch_event(event, |kind, policy| Ok(HostPolicyEvent { kind, policy })),
                Err(e) => Some(Err(e)),
            }
        })))
    }

    async fn check_custom_resource_definition(&self, kind: &str) -> anyhow::Result<bool> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let plural = format!("{}s", kind.to_lowercase());
        let name = format!("{plural}.security.kube-sentry.io");
        Ok(api.get(&name).await.is_ok())
    }

    async fn get_deployment_name_controlling_replica_set(
        &self,
        namespace: &str,
        replica_set: &str,
    ) -> anyhow::Result<Option<String>> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let rs = match api.get(replica_set).await {
            Ok(rs) => rs,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let owners = rs.metadata.owner_references.unwrap_or_default();
        Ok(owners
            .into_iter()
            .find(|o| o.kind == "Deployment")
            .map(|o| o.name))
    }

    async fn get_node_identities(&self) -> anyhow::Result<Vec<String>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let node = api.get(&self.node_name).await?;

        let mut identities = vec![format!("nodeName={}", self.node_name)];
        if let Some(labels) = &node.metadata.labels {
            for (k, v) in labels {
                identities.push(format!("{k}={v}"));
            }
        }
        Ok(identities)
    }

    async fn patch_deployment_with_apparmor_annotations(
        &self,
        namespace: &str,
        deployment: &str,
        profiles: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        let mut annotations = serde_json::Map::new();
        for (container, profile) in profiles {
            annotations.insert(
                format!("container.apparmor.security.beta.kubernetes.io/{container}"),
                serde_json::Value::String(format!("localhost/{profile}")),
            );
        }

        let patch = serde_json::json!({
            "spec": { "template": { "metadata": { "annotations": annotations } } }
        });

        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            deployment,
            &PatchParams::apply("kube-sentry"),
            &Patch::Strategic(&patch),
        )
        .await?;
        Ok(())
    }

    async fn patch_deployment_with_selinux_options(
        &self,
        namespace: &str,
        deployment: &str,
        selinux_types: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        let containers: Vec<serde_json::Value> = selinux_types
            .iter()
            .map(|(name, selinux_type)| {
                serde_json::json!({
                    "name": name,
                    "securityContext": {
                        "seLinuxOptions": { "type": selinux_type }
                    },
                    // cleared so the rolling-update strategic merge doesn't
                    // duplicate volume mounts already present on the live pod
                    "volumeMounts": serde_json::Value::Null,
                })
            })
            .collect();

        let patch = serde_json::json!({
            "spec": { "template": { "spec": { "containers": containers } } }
        });

        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            deployment,
            &PatchParams::apply("kube-sentry"),
            &Patch::Strategic(&patch),
        )
        .await?;
        Ok(())
    }
}

/* ============================= LSM SYSFS ============================= */

/// Reads the LSM module list, returning whether `apparmor` is active. A
/// missing or unreadable file is treated as "not present" — the pod is
/// demoted to `audited` rather than the watch loop failing.
pub fn lsm_has_apparmor(lsm_path: &str) -> bool {
    std::fs::read_to_string(lsm_path)
        .map(|contents| contents.split(',').any(|m| m.trim() == "apparmor"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsm_has_apparmor_true_when_present() {
        let dir = std::env::temp_dir().join("kube-sentry-lsm-test-present");
        std::fs::write(&dir, "capability,selinux,apparmor\n").unwrap();
        assert!(lsm_has_apparmor(dir.to_str().unwrap()));
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn lsm_has_apparmor_false_when_absent_module() {
        let dir = std::env::temp_dir().join("kube-sentry-lsm-test-absent");
        std::fs::write(&dir, "capability,selinux\n").unwrap();
        assert!(!lsm_has_apparmor(dir.to_str().unwrap()));
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn lsm_has_apparmor_false_when_file_missing() {
        assert!(!lsm_has_apparmor("/nonexistent/path/lsm"));
    }
}
