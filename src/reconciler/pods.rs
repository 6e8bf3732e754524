//! Pod event handling: pre-reconcile derivations (§4.4.1), the annotation
//! mutator dispatch (§4.4.2), and the store update / endpoint
//! reconciliation (§4.4.3) — numbering follows this module's own doc
//! sections below, not an external document.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod as RawPod;

use crate::enforcement::{Enforcer, EnforcerType};
use crate::feeder::Feeder;
use crate::k8s::{lsm_has_apparmor, EventKind, K8sClient, PodEvent};
use crate::model::{Endpoint, Pod, PolicyMode, FILTERED_LABELS, POLICY_ANNOTATION, VISIBILITY_ANNOTATION};
use crate::store::Store;

use super::PodReconcileConfig;

/// Top-level entry point for one decoded pod watch event.
pub async fn handle_pod_event(
    event: PodEvent,
    store: &Store,
    enforcer: &dyn Enforcer,
    feeder: &dyn Feeder,
    k8s: &dyn K8sClient,
    config: &PodReconcileConfig,
) {
    let Some(mut pod) = decode_pod(&event.pod, k8s).await else {
        return;
    };

    match event.kind {
        EventKind::Added | EventKind::Modified => {
            if store.pod_is_patched(&pod.namespace, &pod.name) {
                return;
            }

            apply_default_policy_mode(&mut pod, config.per_pod_enforcer);
            apply_kube_system_exceptions(&mut pod);
            apply_lsm_gating(&mut pod, enforcer, &config.lsm_path);
            apply_visibility_default(&mut pod);

            // Captured before the annotation mutator runs: a successful patch
            // rewrites the annotation to "patched", which resolves to
            // Disabled. The endpoint must still reflect the mode the engine
            // actually reconciled against (Enabled), not the post-patch sink
            // value.
            let resolved_mode = pod.resolved_policy_mode();

            if resolved_mode == PolicyMode::Enabled {
                crate::annotate::run(&mut pod, &event.pod, enforcer, k8s, feeder).await;
            }

            store.upsert_pod(pod.clone());
            update_endpoint_with_pod(event.kind, pod, resolved_mode, store, enforcer, feeder).await;
        }
        EventKind::Deleted => {
            let resolved_mode = pod.resolved_policy_mode();
            store.remove_pod(&pod.namespace, &pod.name);
            update_endpoint_with_pod(EventKind::Deleted, pod, resolved_mode, store, enforcer, feeder).await;
        }
    }
}

/* ============================= DECODE ============================= */

fn strip_container_id_prefix(id: &str) -> String {
    id.strip_prefix("docker://")
        .or_else(|| id.strip_prefix("containerd://"))
        .unwrap_or(id)
        .to_string()
}

async fn resolve_deployment(raw: &RawPod, k8s: &dyn K8sClient) -> Option<String> {
    let namespace = raw.metadata.namespace.as_deref().unwrap_or_default();
    let owners = raw.metadata.owner_references.as_ref()?;
    let rs_owner = owners.iter().find(|o| o.kind == "ReplicaSet")?;
    k8s.get_deployment_name_controlling_replica_set(namespace, &rs_owner.name)
        .await
        .ok()
        .flatten()
}

async fn decode_pod(raw: &RawPod, k8s: &dyn K8sClient) -> Option<Pod> {
    let namespace = raw.metadata.namespace.clone().unwrap_or_default();
    let name = raw.metadata.name.clone()?;
    let deployment = resolve_deployment(raw, k8s).await;

    let mut labels = BTreeMap::new();
    if let Some(raw_labels) = &raw.metadata.labels {
        for (k, v) in raw_labels {
            if FILTERED_LABELS.contains(&k.as_str()) {
                continue;
            }
            labels.insert(k.clone(), v.clone());
        }
    }

    let annotations = raw.metadata.annotations.clone().unwrap_or_default();

    let mut containers = BTreeMap::new();
    if let Some(statuses) = raw.status.as_ref().and_then(|s| s.container_statuses.as_ref()) {
        for status in statuses {
            let raw_id = status.container_id.clone().unwrap_or_default();
            if raw_id.is_empty() {
                continue;
            }
            let id = strip_container_id_prefix(&raw_id);
            if id.is_empty() {
                continue;
            }
            containers.insert(id, status.name.clone());
        }
    }

    Some(Pod {
        namespace,
        name,
        deployment,
        labels,
        annotations,
        containers,
        host_volumes: Vec::new(),
        metadata: BTreeMap::new(),
    })
}

/* ============================= PRE-RECONCILE DERIVATIONS ============================= */

fn apply_default_policy_mode(pod: &mut Pod, per_pod_enforcer: bool) {
    let current = pod.annotations.get(POLICY_ANNOTATION).cloned();
    if current.as_deref() == Some("patched") {
        return;
    }

    let resolved = if per_pod_enforcer {
        match current.as_deref() {
            Some("enabled") | Some("disabled") => current.unwrap(),
            _ => "audited".to_string(),
        }
    } else {
        match current.as_deref() {
            Some("enabled") | Some("disabled") | Some("audited") => current.unwrap(),
            _ => "enabled".to_string(),
        }
    };

    pod.annotations.insert(POLICY_ANNOTATION.to_string(), resolved);
}

fn apply_kube_system_exceptions(pod: &mut Pod) {
    if pod.namespace != "kube-system" {
        return;
    }
    let force_audited = pod.labels.contains_key("k8s-app")
        || pod.labels.get("io.cilium/app").map(|v| v == "operator").unwrap_or(false);
    if force_audited {
        pod.annotations
            .insert(POLICY_ANNOTATION.to_string(), "audited".to_string());
    }
}

fn apply_lsm_gating(pod: &mut Pod, enforcer: &dyn Enforcer, lsm_path: &str) {
    if pod.annotations.get(POLICY_ANNOTATION).map(|s| s.as_str()) != Some("enabled") {
        return;
    }
    if !enforcer.is_enabled() {
        pod.annotations
            .insert(POLICY_ANNOTATION.to_string(), "audited".to_string());
        return;
    }
    if enforcer.enforcer_type() == EnforcerType::AppArmor && !lsm_has_apparmor(lsm_path) {
        pod.annotations
            .insert(POLICY_ANNOTATION.to_string(), "audited".to_string());
    }
}

fn apply_visibility_default(pod: &mut Pod) {
    pod.annotations
        .entry(VISIBILITY_ANNOTATION.to_string())
        .or_insert_with(|| "none".to_string());
}

/* ============================= ENDPOINT RECONCILIATION ============================= */

fn build_identities_and_labels(pod: &Pod) -> (Vec<String>, Vec<String>) {
    let mut identities = vec![Endpoint::namespace_identity(&pod.namespace)];
    let mut labels = Vec::new();
    for (k, v) in &pod.labels {
        let id = format!("{k}={v}");
        identities.push(id.clone());
        labels.push(id);
    }
    (identities, labels)
}

fn selinux_profiles_from_metadata(pod: &Pod) -> BTreeMap<String, String> {
    pod.metadata
        .iter()
        .filter_map(|(k, v)| k.strip_prefix("selinux-").map(|c| (c.to_string(), v.clone())))
        .collect()
}

async fn update_endpoint_with_pod(
    kind: EventKind,
    pod: Pod,
    resolved_mode: PolicyMode,
    store: &Store,
    enforcer: &dyn Enforcer,
    feeder: &dyn Feeder,
) {
    match kind {
        EventKind::Added => {
            let (identities, labels) = build_identities_and_labels(&pod);
            let visibility = pod.visibility();
            let policy_mode = Some(resolved_mode);
            let container_ids: Vec<String> = pod.containers.keys().cloned().collect();

            let apparmor_profiles =
                store.join_containers(&container_ids, &pod.namespace, &pod.name, policy_mode, visibility);
            let selinux_profiles = selinux_profiles_from_metadata(&pod);
            let security_policies = store.get_security_policies(&identities);

            let endpoint = Endpoint {
                namespace: pod.namespace.clone(),
                name: pod.name.clone(),
                containers: container_ids,
                labels,
                identities,
                policy_mode,
                process_visibility: visibility.process,
                file_visibility: visibility.file,
                network_visibility: visibility.network,
                capabilities_visibility: visibility.capabilities,
                apparmor_profiles,
                selinux_profiles,
                host_volumes: pod.host_volumes.clone(),
                security_policies,
            };

            store.insert_endpoint(endpoint.clone());

            if policy_mode == Some(PolicyMode::Enabled) {
                enforcer.update_security_profiles("ADDED", &pod, true).await;
            }
            feeder.update_security_policies("ADDED", &endpoint).await;
            enforcer.update_security_policies(&endpoint).await;
        }
        EventKind::Modified => {
            let Some(mut endpoint) = store.find_endpoint(&pod.namespace, &pod.name) else {
                return;
            };
            let prev_mode = endpoint.policy_mode;

            let (identities, labels) = build_identities_and_labels(&pod);
            let visibility = pod.visibility();
            let policy_mode = Some(resolved_mode);
            let container_ids: Vec<String> = pod.containers.keys().cloned().collect();

            let apparmor_profiles =
                store.join_containers(&container_ids, &pod.namespace, &pod.name, policy_mode, visibility);
            let selinux_profiles = selinux_profiles_from_metadata(&pod);

            endpoint.containers = container_ids;
            endpoint.labels = labels;
            endpoint.identities = identities.clone();
            endpoint.policy_mode = policy_mode;
            endpoint.process_visibility = visibility.process;
            endpoint.file_visibility = visibility.file;
            endpoint.network_visibility = visibility.network;
            endpoint.capabilities_visibility = visibility.capabilities;
            endpoint.apparmor_profiles = apparmor_profiles;
            endpoint.selinux_profiles = selinux_profiles;
            endpoint.host_volumes = pod.host_volumes.clone();
            endpoint.security_policies = store.get_security_policies(&identities);

            store.replace_endpoint(endpoint.clone());

            if prev_mode != Some(PolicyMode::Enabled) && policy_mode == Some(PolicyMode::Enabled) {
                enforcer.update_security_profiles("ADDED", &pod, true).await;
            }
            feeder.update_security_policies("MODIFIED", &endpoint).await;
            enforcer.update_security_policies(&endpoint).await;
        }
        EventKind::Deleted => {
            let Some(endpoint) = store.find_endpoint(&pod.namespace, &pod.name) else {
                return;
            };
            if endpoint.policy_mode == Some(PolicyMode::Enabled) {
                enforcer.update_security_profiles("DELETED", &pod, true).await;
            }
            store.remove_endpoint(&pod.namespace, &pod.name);
        }
    }
}
