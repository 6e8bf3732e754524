//! Wire schema for the two CRDs this engine watches: `SecurityPolicy`
//! (workload-scoped) and `HostSecurityPolicy` (node-scoped).
//!
//! These double as the engine's in-memory normalized form — the same
//! struct is decoded off the wire and then mutated in place by
//! [`crate::normalize`], matching the source daemon's approach of cloning
//! the decoded spec and defaulting it before it ever reaches the store.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/* ============================= SELECTORS ============================= */

/// Workload policy selector: `matchLabels` as declared, `identities` as
/// computed by the normalizer (`namespaceName=<ns>` plus every `k=v` pair).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub match_labels: std::collections::BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<String>,
}

/// Host policy selector: `matchLabels` against node labels, no namespace
/// prefix is injected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelector {
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub match_labels: std::collections::BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<String>,
}

/* ============================= COMMON MATCH FIELDS ============================= */

/// Fields every match entry and every section carries, with the same
/// three-tier inheritance rule: entry overrides section overrides top-level.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchMeta {
    #[serde(default)]
    pub severity: u8,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
}

macro_rules! match_entry {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            $(pub $field: $ty,)*
            #[serde(flatten)]
            pub meta: MatchMeta,
        }
    };
}

match_entry!(MatchPath { path: String });
match_entry!(MatchDirectory { directory: String, recursive: bool });
match_entry!(MatchPattern { pattern: String });
match_entry!(MatchProtocol { protocol: String });
match_entry!(MatchCapability { capability: String });
match_entry!(MatchVolumeMount { path: String });

/* ============================= SECTIONS ============================= */

/// A policy section (Process, File, Network, Capabilities, SELinux): a
/// default [`MatchMeta`] plus zero or more typed match lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSection {
    #[serde(flatten)]
    pub meta: MatchMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_paths: Vec<MatchPath>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_directories: Vec<MatchDirectory>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_patterns: Vec<MatchPattern>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileSection {
    #[serde(flatten)]
    pub meta: MatchMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_paths: Vec<MatchPath>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_directories: Vec<MatchDirectory>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_patterns: Vec<MatchPattern>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSection {
    #[serde(flatten)]
    pub meta: MatchMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_protocols: Vec<MatchProtocol>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesSection {
    #[serde(flatten)]
    pub meta: MatchMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_capabilities: Vec<MatchCapability>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SELinuxSection {
    #[serde(flatten)]
    pub meta: MatchMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_volume_mounts: Vec<MatchVolumeMount>,
}

/* ============================= SECURITY POLICY (workload) ============================= */

/// `SecurityPolicy` applies to pods whose identities are a superset of
/// `selector.identities`. Namespaced.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "security.kube-sentry.io",
    version = "v1",
    kind = "SecurityPolicy",
    plural = "securitypolicies",
    status = "SecurityPolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicySpec {
    pub selector: WorkloadSelector,

    #[serde(default)]
    pub severity: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,

    #[serde(default)]
    pub process: ProcessSection,
    #[serde(default)]
    pub file: FileSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub capabilities: CapabilitiesSection,
    #[serde(default)]
    pub selinux: SELinuxSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/* ============================= HOST SECURITY POLICY ============================= */

/// `HostSecurityPolicy` applies to nodes whose identities are a superset of
/// `node_selector.identities`. Cluster-scoped (no `namespaced` in `#[kube]`).
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "security.kube-sentry.io",
    version = "v1",
    kind = "HostSecurityPolicy",
    plural = "hostsecuritypolicies",
    status = "HostSecurityPolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HostSecurityPolicySpec {
    pub node_selector: NodeSelector,

    #[serde(default)]
    pub severity: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,

    #[serde(default)]
    pub process: ProcessSection,
    #[serde(default)]
    pub file: FileSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub capabilities: CapabilitiesSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostSecurityPolicyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/* ============================= NORMALIZED WRAPPERS ============================= */

/// A normalized workload policy paired with the `(namespace, policyName)`
/// identity the Reconciler matches MODIFIED events by (DELETED still uses
/// full deep equality — the asymmetry is a preserved source quirk, see
/// DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedSecurityPolicy {
    pub namespace: String,
    pub policy_name: String,
    pub spec: SecurityPolicySpec,
}

impl NormalizedSecurityPolicy {
    pub fn key(&self) -> (&str, &str) {
        (self.namespace.as_str(), self.policy_name.as_str())
    }
}

/// A normalized host policy paired with its `policyName`. Host policies are
/// cluster-scoped so there's no namespace component to the key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedHostSecurityPolicy {
    pub policy_name: String,
    pub spec: HostSecurityPolicySpec,
}
