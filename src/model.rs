//! In-memory aggregates the reconciler maintains: `Pod`, `Endpoint`, `Container`.
//!
//! These are distinct from the `k8s-openapi` wire types and from the CRD specs
//! in [`crate::crd`] — they're the engine's own normalized view, built by
//! [`crate::k8s`] decoders and mutated by [`crate::reconciler`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Annotation key carrying the desired enforcement mode. Wire-compatible;
/// must match the value clusters already have deployed.
pub const POLICY_ANNOTATION: &str = "kubearmor-policy";
/// Annotation key carrying a comma-separated visibility list.
pub const VISIBILITY_ANNOTATION: &str = "kubearmor-visibility";

/// Labels stripped from every observed pod before they reach identities.
pub const FILTERED_LABELS: &[&str] = &[
    "pod-template-hash",
    "pod-template-generation",
    "controller-revision-hash",
];

/// A single host-path volume mount, cross-referenced against container
/// `volumeMounts` during the SELinux annotation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostVolumeMount {
    pub volume_name: String,
    pub path_name: String,
    pub mount_type: String,
    pub used_by_container_read_only: BTreeMap<String, bool>,
    pub used_by_container_path: BTreeMap<String, String>,
}

/// The annotation-derived policy mode for a pod/endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyMode {
    Enabled,
    Audited,
    Disabled,
}

impl PolicyMode {
    pub fn as_annotation_str(self) -> &'static str {
        match self {
            PolicyMode::Enabled => "enabled",
            PolicyMode::Audited => "audited",
            PolicyMode::Disabled => "disabled",
        }
    }

    pub fn from_annotation_str(s: &str) -> Option<Self> {
        match s {
            "enabled" => Some(PolicyMode::Enabled),
            "audited" => Some(PolicyMode::Audited),
            "disabled" => Some(PolicyMode::Disabled),
            _ => None,
        }
    }
}

/// Parsed `kubearmor-visibility` flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visibility {
    pub process: bool,
    pub file: bool,
    pub network: bool,
    pub capabilities: bool,
}

impl Visibility {
    pub fn from_annotation(value: &str) -> Self {
        let mut v = Visibility::default();
        for part in value.split(',') {
            match part {
                "process" => v.process = true,
                "file" => v.file = true,
                "network" => v.network = true,
                "capabilities" => v.capabilities = true,
                _ => {}
            }
        }
        v
    }
}

/// A decoded, pre-reconcile pod. Built by [`crate::k8s`] from a watch event,
/// mutated by the pod-derivation pass in [`crate::reconciler::pods`] and the
/// annotation mutator in [`crate::annotate`] before the store is updated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub deployment: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// container-id (prefix stripped) -> container name
    pub containers: BTreeMap<String, String>,
    pub host_volumes: Vec<HostVolumeMount>,
    /// ad hoc keys produced by the SELinux pass, e.g. `selinux-<container>`
    pub metadata: BTreeMap<String, String>,
}

impl Pod {
    pub fn key(&self) -> (String, String) {
        (self.namespace.clone(), self.name.clone())
    }

    pub fn policy_mode_annotation(&self) -> Option<&str> {
        self.annotations.get(POLICY_ANNOTATION).map(|s| s.as_str())
    }

    pub fn is_patched(&self) -> bool {
        self.policy_mode_annotation() == Some("patched")
    }

    pub fn resolved_policy_mode(&self) -> PolicyMode {
        match self.policy_mode_annotation() {
            Some("enabled") => PolicyMode::Enabled,
            Some("audited") => PolicyMode::Audited,
            _ => PolicyMode::Disabled,
        }
    }

    pub fn visibility(&self) -> Visibility {
        self.annotations
            .get(VISIBILITY_ANNOTATION)
            .map(|v| Visibility::from_annotation(v))
            .unwrap_or_default()
    }
}

/// One per observed pod; the unit that carries the current policy
/// projection and is consumed by the [`crate::enforcement::Enforcer`] and
/// [`crate::feeder::Feeder`] collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    pub namespace: String,
    pub name: String,
    pub containers: Vec<String>,
    pub labels: Vec<String>,
    pub identities: Vec<String>,
    pub policy_mode: Option<PolicyMode>,
    pub process_visibility: bool,
    pub file_visibility: bool,
    pub network_visibility: bool,
    pub capabilities_visibility: bool,
    /// container-id -> profile name
    pub apparmor_profiles: BTreeMap<String, String>,
    pub selinux_profiles: BTreeMap<String, String>,
    pub host_volumes: Vec<HostVolumeMount>,
    pub security_policies: Vec<crate::crd::NormalizedSecurityPolicy>,
}

impl Endpoint {
    pub fn key(&self) -> (String, String) {
        (self.namespace.clone(), self.name.clone())
    }

    pub fn namespace_identity(namespace: &str) -> String {
        format!("namespaceName={namespace}")
    }
}

/// A single running container, identified by container-id. Shared with an
/// external container-runtime watcher (out of scope); the engine only reads
/// `apparmor_profile` back and writes the fields an endpoint derives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Container {
    pub namespace: String,
    pub name: String,
    pub policy_mode: Option<PolicyMode>,
    pub process_visibility: bool,
    pub file_visibility: bool,
    pub network_visibility: bool,
    pub capabilities_visibility: bool,
    pub apparmor_profile: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_parses_all_flags() {
        let v = Visibility::from_annotation("process,file,network,capabilities");
        assert!(v.process && v.file && v.network && v.capabilities);
    }

    #[test]
    fn visibility_ignores_unknown_tokens() {
        let v = Visibility::from_annotation("process,bogus");
        assert!(v.process);
        assert!(!v.file);
    }

    #[test]
    fn policy_mode_round_trips_through_annotation_string() {
        for mode in [PolicyMode::Enabled, PolicyMode::Audited, PolicyMode::Disabled] {
            assert_eq!(
                PolicyMode::from_annotation_str(mode.as_annotation_str()),
                Some(mode)
            );
        }
    }

    #[test]
    fn pod_is_patched_only_on_sink_value() {
        let mut pod = Pod::default();
        pod.annotations
            .insert(POLICY_ANNOTATION.to_string(), "enabled".to_string());
        assert!(!pod.is_patched());
        pod.annotations
            .insert(POLICY_ANNOTATION.to_string(), "patched".to_string());
        assert!(pod.is_patched());
    }
}
