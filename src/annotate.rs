//! Annotation Mutator — for policy-enabled pods lacking LSM labels, computes
//! a patch against the owning Deployment and marks the pod `patched` on
//! success. Two independent passes, selected by enforcer type; both read
//! from the raw decoded pod (for volume/securityContext data the engine's
//! lightweight [`crate::model::Pod`] doesn't carry) and write back onto the
//! lightweight pod.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod as RawPod;

use crate::enforcement::Enforcer;
use crate::feeder::Feeder;
use crate::k8s::K8sClient;
use crate::model::{HostVolumeMount, Pod, POLICY_ANNOTATION};

/// AppArmor pass. Runs only when the enforcer is enabled and of type
/// `apparmor`.
pub async fn apparmor_pass(pod: &mut Pod, k8s: &dyn K8sClient, feeder: &dyn Feeder) {
    let mut profiles: BTreeMap<String, String> = BTreeMap::new();
    let mut synthesized = false;

    for (container_id, container_name) in &pod.containers {
        let annotation_key = format!("container.apparmor.security.beta.kubernetes.io/{container_name}");
        let profile = match pod.annotations.get(&annotation_key) {
            Some(value) if value == "unconfined" => value.clone(),
            Some(value) => value
                .strip_prefix("localhost/")
                .unwrap_or(value)
                .to_string(),
            None => {
                synthesized = true;
                format!("kubearmor-{}-{}", pod.namespace, container_name)
            }
        };
        profiles.insert(container_id.clone(), profile);
    }

    if !synthesized {
        return;
    }

    let Some(deployment) = pod.deployment.clone() else {
        return;
    };

    match k8s
        .patch_deployment_with_apparmor_annotations(&pod.namespace, &deployment, &profiles)
        .await
    {
        Ok(()) => {
            pod.annotations
                .insert(POLICY_ANNOTATION.to_string(), "patched".to_string());
        }
        Err(e) => {
            feeder.errf(&format!(
                "failed to patch AppArmor annotations for {}/{}: {e}",
                pod.namespace, pod.name
            ));
        }
    }
}

/// SELinux pass. Runs only when the enforcer is enabled and of type
/// `selinux`. Needs the raw decoded pod for `volumes`/`volumeMounts`/
/// `securityContext`, which the lightweight [`Pod`] doesn't retain.
pub async fn selinux_pass(pod: &mut Pod, raw: &RawPod, k8s: &dyn K8sClient, feeder: &dyn Feeder) {
    let Some(spec) = &raw.spec else { return };

    let mut host_volumes: Vec<HostVolumeMount> = spec
        .volumes
        .iter()
        .filter_map(|v| {
            v.host_path.as_ref().map(|hp| HostVolumeMount {
                volume_name: v.name.clone(),
                path_name: hp.path.clone(),
                mount_type: hp.type_.clone().unwrap_or_default(),
                used_by_container_read_only: BTreeMap::new(),
                used_by_container_path: BTreeMap::new(),
            })
        })
        .collect();

    for container in &spec.containers {
        let Some(mounts) = &container.volume_mounts else {
            continue;
        };
        for mount in mounts {
            if let Some(hv) = host_volumes.iter_mut().find(|hv| hv.volume_name == mount.name) {
                hv.used_by_container_read_only
                    .insert(container.name.clone(), mount.read_only.unwrap_or(false));
                hv.used_by_container_path
                    .insert(container.name.clone(), mount.mount_path.clone());
            }
        }
    }
    pod.host_volumes = host_volumes;

    let mut to_synthesize: BTreeMap<String, String> = BTreeMap::new();

    for container in &spec.containers {
        let existing_type = container
            .security_context
            .as_ref()
            .and_then(|sc| sc.se_linux_options.as_ref())
            .and_then(|o| o.type_.as_ref());

        match existing_type {
            Some(t) if t.contains(".process") => {
                let prefix = t.split(".process").next().unwrap_or(t);
                pod.metadata
                    .insert(format!("selinux-{}", container.name), prefix.to_string());
            }
            Some(t) if !t.is_empty() => {}
            _ => {
                if let Some(deployment) = &pod.deployment {
                    to_synthesize.insert(
                        container.name.clone(),
                        format!("kubearmor-{}-{}-{}.process", pod.namespace, deployment, container.name),
                    );
                }
            }
        }
    }

    if to_synthesize.is_empty() {
        return;
    }

    let Some(deployment) = pod.deployment.clone() else {
        return;
    };

    match k8s
        .patch_deployment_with_selinux_options(&pod.namespace, &deployment, &to_synthesize)
        .await
    {
        Ok(()) => {
            pod.annotations
                .insert(POLICY_ANNOTATION.to_string(), "patched".to_string());
        }
        Err(e) => {
            feeder.errf(&format!(
                "failed to patch SELinux options for {}/{}: {e}",
                pod.namespace, pod.name
            ));
        }
    }
}

/// Dispatches to the pass matching the enforcer's type, only when enabled.
pub async fn run(pod: &mut Pod, raw: &RawPod, enforcer: &dyn Enforcer, k8s: &dyn K8sClient, feeder: &dyn Feeder) {
    if !enforcer.is_enabled() {
        return;
    }
    match enforcer.enforcer_type() {
        crate::enforcement::EnforcerType::AppArmor => apparmor_pass(pod, k8s, feeder).await,
        crate::enforcement::EnforcerType::SELinux => selinux_pass(pod, raw, k8s, feeder).await,
        crate::enforcement::EnforcerType::None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeder::test_support::RecordingFeeder;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeK8s {
        apparmor_calls: Mutex<Vec<(String, String, BTreeMap<String, String>)>>,
        selinux_calls: Mutex<Vec<(String, String, BTreeMap<String, String>)>>,
        fail: bool,
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
            Ok(vec![])
        }
        async fn patch_deployment_with_apparmor_annotations(
            &self,
            namespace: &str,
            deployment: &str,
            profiles: &BTreeMap<String, String>,
        ) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("patch failed");
            }
            self.apparmor_calls.lock().unwrap().push((
                namespace.to_string(),
                deployment.to_string(),
                profiles.clone(),
            ));
            Ok(())
        }
        async fn patch_deployment_with_selinux_options(
            &self,
            namespace: &str,
            deployment: &str,
            selinux_types: &BTreeMap<String, String>,
        ) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("patch failed");
            }
            self.selinux_calls.lock().unwrap().push((
                namespace.to_string(),
                deployment.to_string(),
                selinux_types.clone(),
            ));
            Ok(())
        }
    }

    fn pod_with_container(ns: &str, name: &str, deployment: &str, cid: &str, cname: &str) -> Pod {
        let mut containers = BTreeMap::new();
        containers.insert(cid.to_string(), cname.to_string());
        Pod {
            namespace: ns.to_string(),
            name: name.to_string(),
            deployment: Some(deployment.to_string()),
            containers,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn apparmor_pass_synthesizes_profile_and_patches() {
        let k8s = FakeK8s::default();
        let feeder = RecordingFeeder::default();
        let mut pod = pod_with_container("app", "web-1", "web", "c1", "main");

        apparmor_pass(&mut pod, &k8s, &feeder).await;

        let calls = k8s.apparmor_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2.get("c1"), Some(&"kubearmor-app-main".to_string()));
        assert_eq!(pod.annotations.get(POLICY_ANNOTATION), Some(&"patched".to_string()));
    }

    #[tokio::test]
    async fn apparmor_pass_uses_existing_annotation_without_patching() {
        let k8s = FakeK8s::default();
        let feeder = RecordingFeeder::default();
        let mut pod = pod_with_container("app", "web-1", "web", "c1", "main");
        pod.annotations.insert(
            "container.apparmor.security.beta.kubernetes.io/main".to_string(),
            "localhost/my-profile".to_string(),
        );

        apparmor_pass(&mut pod, &k8s, &feeder).await;

        assert!(k8s.apparmor_calls.lock().unwrap().is_empty());
        assert!(!pod.is_patched());
    }

    #[tokio::test]
    async fn apparmor_pass_preserves_unconfined_verbatim() {
        let k8s = FakeK8s::default();
        let feeder = RecordingFeeder::default();
        let mut pod = pod_with_container("app", "web-1", "web", "c1", "main");
        pod.annotations.insert(
            "container.apparmor.security.beta.kubernetes.io/main".to_string(),
            "unconfined".to_string(),
        );

        apparmor_pass(&mut pod, &k8s, &feeder).await;
        assert!(k8s.apparmor_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn apparmor_pass_logs_error_and_leaves_unpatched_on_failure() {
        let k8s = FakeK8s {
            fail: true,
            ..Default::default()
        };
        let feeder = RecordingFeeder::default();
        let mut pod = pod_with_container("app", "web-1", "web", "c1", "main");

        apparmor_pass(&mut pod, &k8s, &feeder).await;

        assert!(!pod.is_patched());
        assert!(!feeder.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn apparmor_pass_skips_patch_without_deployment() {
        let k8s = FakeK8s::default();
        let feeder = RecordingFeeder::default();
        let mut pod = pod_with_container("app", "web-1", "web", "c1", "main");
        pod.deployment = None;

        apparmor_pass(&mut pod, &k8s, &feeder).await;
        assert!(k8s.apparmor_calls.lock().unwrap().is_empty());
        assert!(!pod.is_patched());
    }

    fn raw_pod_with_container(cname: &str, selinux_type: Option<&str>) -> RawPod {
        use k8s_openapi::api::core::v1::{Container, PodSpec, SELinuxOptions, SecurityContext};

        RawPod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: cname.to_string(),
                    security_context: selinux_type.map(|t| SecurityContext {
                        se_linux_options: Some(SELinuxOptions {
                            type_: Some(t.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn selinux_pass_synthesizes_when_type_absent() {
        let k8s = FakeK8s::default();
        let feeder = RecordingFeeder::default();
        let mut pod = pod_with_container("app", "web-1", "web", "c1", "main");
        let raw = raw_pod_with_container("main", None);

        selinux_pass(&mut pod, &raw, &k8s, &feeder).await;

        let calls = k8s.selinux_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2.get("main"), Some(&"kubearmor-app-web-main.process".to_string()));
        assert!(pod.is_patched());
    }

    #[tokio::test]
    async fn selinux_pass_synthesizes_when_type_empty() {
        let k8s = FakeK8s::default();
        let feeder = RecordingFeeder::default();
        let mut pod = pod_with_container("app", "web-1", "web", "c1", "main");
        let raw = raw_pod_with_container("main", Some(""));

        selinux_pass(&mut pod, &raw, &k8s, &feeder).await;

        let calls = k8s.selinux_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2.get("main"), Some(&"kubearmor-app-web-main.process".to_string()));
    }

    #[tokio::test]
    async fn selinux_pass_extracts_prefix_from_existing_process_type() {
        let k8s = FakeK8s::default();
        let feeder = RecordingFeeder::default();
        let mut pod = pod_with_container("app", "web-1", "web", "c1", "main");
        let raw = raw_pod_with_container("main", Some("kubearmor-app-web-main.process"));

        selinux_pass(&mut pod, &raw, &k8s, &feeder).await;

        assert!(k8s.selinux_calls.lock().unwrap().is_empty());
        assert_eq!(pod.metadata.get("selinux-main"), Some(&"kubearmor-app-web-main".to_string()));
    }

    #[tokio::test]
    async fn selinux_pass_leaves_non_empty_non_process_type_untouched() {
        let k8s = FakeK8s::default();
        let feeder = RecordingFeeder::default();
        let mut pod = pod_with_container("app", "web-1", "web", "c1", "main");
        let raw = raw_pod_with_container("main", Some("container_t"));

        selinux_pass(&mut pod, &raw, &k8s, &feeder).await;

        assert!(k8s.selinux_calls.lock().unwrap().is_empty());
        assert!(pod.metadata.get("selinux-main").is_none());
        assert!(!pod.is_patched());
    }
}
