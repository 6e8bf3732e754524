//! Host `HostSecurityPolicy` event handling: normalize, upsert into the
//! store, then recompute and push the full node-scoped projection (there's
//! no per-endpoint join here — the whole projection goes out whenever the
//! backing node-identity set or host policy collection changes).

use crate::crd::NormalizedHostSecurityPolicy;
use crate::enforcement::Enforcer;
use crate::feeder::Feeder;
use crate::k8s::{EventKind, HostPolicyEvent, K8sClient};
use crate::store::Store;

pub async fn handle_host_policy_event(
    event: HostPolicyEvent,
    store: &Store,
    k8s: &dyn K8sClient,
    enforcer: &dyn Enforcer,
    feeder: &dyn Feeder,
) {
    let Some(policy_name) = event.policy.metadata.name.clone() else {
        return;
    };
    let spec = crate::normalize::normalize_host_security_policy(event.policy.spec);
    let normalized = NormalizedHostSecurityPolicy { policy_name, spec };

    match event.kind {
        EventKind::Added => {
            store.add_host_policy(normalized);
        }
        EventKind::Modified => {
            store.replace_host_policy(normalized);
        }
        EventKind::Deleted => {
            store.remove_host_policy(&normalized);
        }
    }

    let node_identities = match k8s.get_node_identities().await {
        Ok(identities) => identities,
        Err(e) => {
            feeder.errf(&format!("failed to read node identities: {e}"));
            return;
        }
    };

    let projection = store.host_policy_projection(&node_identities);
    feeder.update_host_security_policies("UPDATED", &projection).await;
    enforcer.update_host_security_policies(&projection).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{HostSecurityPolicy, HostSecurityPolicySpec};
    use crate::enforcement::test_support::RecordingEnforcer;
    use crate::feeder::test_support::RecordingFeeder;
    use async_trait::async_trait;
    use kube::core::ObjectMeta;
    use std::collections::BTreeMap;

    struct FakeK8s {
        identities: Vec<String>,
    }

    #[async_trait]
    impl K8sClient for FakeK8s {
        async fn watch_pods(&self) -> anyhow::Result<crate::k8s::PodStream> {
            unimplemented!()
        }
        async fn watch_security_policies(&self) -> anyhow::Result<crate::k8s::PolicyStream> {
            unimplemented!()
        }
        async fn watch_host_security_policies(&self) -> anyhow::Result<crate::k8s::HostPolicyStream> {
            unimplemented!()
        }
        async fn check_custom_resource_definition(&self, _kind: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn get_deployment_name_controlling_replica_set(
            &self,
            _namespace: &str,
            _replica_set: &str,
        ) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
        async fn get_node_identities(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.identities.clone())
        }
        async fn patch_deployment_with_apparmor_annotations(
            &self,
            _namespace: &str,
            _deployment: &str,
            _profiles: &BTreeMap<String, String>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn patch_deployment_with_selinux_options(
            &self,
            _namespace: &str,
            _deployment: &str,
            _selinux_types: &BTreeMap<String, String>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn host_policy_event(kind: EventKind, name: &str, role: &str) -> HostPolicyEvent {
        let mut spec = HostSecurityPolicySpec::default();
        spec.node_selector.match_labels.insert("role".to_string(), role.to_string());
        HostPolicyEvent {
            kind,
            policy: HostSecurityPolicy {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                spec,
                status: None,
            },
        }
    }

    #[tokio::test]
    async fn added_policy_for_matching_node_is_pushed_to_collaborators() {
        let store = Store::new();
        let enforcer = RecordingEnforcer::default();
        let feeder = RecordingFeeder::default();
        let k8s = FakeK8s {
            identities: vec!["nodeName=n1".to_string(), "role=edge".to_string()],
        };

        handle_host_policy_event(host_policy_event(EventKind::Added, "edge-only", "edge"), &store, &k8s, &enforcer, &feeder)
            .await;

        assert_eq!(feeder.host_policy_calls.lock().unwrap().len(), 1);
        assert_eq!(feeder.host_policy_calls.lock().unwrap()[0], ("UPDATED".to_string(), 1));
        assert_eq!(enforcer.host_policy_calls.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn added_policy_for_non_matching_node_yields_empty_projection() {
        let store = Store::new();
        let enforcer = RecordingEnforcer::default();
        let feeder = RecordingFeeder::default();
        let k8s = FakeK8s {
            identities: vec!["nodeName=n1".to_string(), "role=core".to_string()],
        };

        handle_host_policy_event(host_policy_event(EventKind::Added, "edge-only", "edge"), &store, &k8s, &enforcer, &feeder)
            .await;

        assert_eq!(feeder.host_policy_calls.lock().unwrap()[0], ("UPDATED".to_string(), 0));
    }

    #[tokio::test]
    async fn deleted_policy_removes_from_projection() {
        let store = Store::new();
        let enforcer = RecordingEnforcer::default();
        let feeder = RecordingFeeder::default();
        let k8s = FakeK8s {
            identities: vec!["role=edge".to_string()],
        };

        handle_host_policy_event(host_policy_event(EventKind::Added, "edge-only", "edge"), &store, &k8s, &enforcer, &feeder)
            .await;
        handle_host_policy_event(host_policy_event(EventKind::Deleted, "edge-only", "edge"), &store, &k8s, &enforcer, &feeder)
            .await;

        let calls = feeder.host_policy_calls.lock().unwrap();
        assert_eq!(calls.last(), Some(&("UPDATED".to_string(), 0)));
    }
}
