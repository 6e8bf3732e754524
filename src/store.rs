//! State Store — the five in-memory collections the Reconciler joins.
//!
//! Each collection is guarded by its own `Mutex`. Callers must take locks in
//! the fixed descending order `endpoints -> containers -> pods ->
//! workload_policies -> host_policies` and never hold more than the
//! documented endpoint/container pair at once.

use std::sync::Mutex;

use crate::crd::{NormalizedHostSecurityPolicy, NormalizedSecurityPolicy};
use crate::model::{Container, Endpoint, Pod};

#[derive(Default)]
pub struct Store {
    pub endpoints: Mutex<Vec<Endpoint>>,
    pub containers: Mutex<std::collections::BTreeMap<String, Container>>,
    pub pods: Mutex<Vec<Pod>>,
    pub workload_policies: Mutex<Vec<NormalizedSecurityPolicy>>,
    pub host_policies: Mutex<Vec<NormalizedHostSecurityPolicy>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /* ============================= PODS ============================= */

    pub fn upsert_pod(&self, pod: Pod) {
        let mut pods = self.pods.lock().unwrap();
        if let Some(existing) = pods.iter_mut().find(|p| p.key() == pod.key()) {
            *existing = pod;
        } else {
            pods.push(pod);
        }
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) {
        let mut pods = self.pods.lock().unwrap();
        pods.retain(|p| !(p.namespace == namespace && p.name == name));
    }

    /// Returns true if a previously observed pod with this key has already
    /// reached the `patched` sink state.
    pub fn pod_is_patched(&self, namespace: &str, name: &str) -> bool {
        let pods = self.pods.lock().unwrap();
        pods.iter()
            .any(|p| p.namespace == namespace && p.name == name && p.is_patched())
    }

    pub fn find_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        let pods = self.pods.lock().unwrap();
        pods.iter()
            .find(|p| p.namespace == namespace && p.name == name)
            .cloned()
    }

    /* ============================= ENDPOINTS ============================= */

    pub fn find_endpoint(&self, namespace: &str, name: &str) -> Option<Endpoint> {
        let endpoints = self.endpoints.lock().unwrap();
        endpoints
            .iter()
            .find(|e| e.namespace == namespace && e.name == name)
            .cloned()
    }

    pub fn insert_endpoint(&self, endpoint: Endpoint) {
        self.endpoints.lock().unwrap().push(endpoint);
    }

    pub fn replace_endpoint(&self, endpoint: Endpoint) -> bool {
        let mut endpoints = self.endpoints.lock().unwrap();
        if let Some(existing) = endpoints
            .iter_mut()
            .find(|e| e.namespace == endpoint.namespace && e.name == endpoint.name)
        {
            *existing = endpoint;
            true
        } else {
            false
        }
    }

    pub fn remove_endpoint(&self, namespace: &str, name: &str) {
        let mut endpoints = self.endpoints.lock().unwrap();
        endpoints.retain(|e| !(e.namespace == namespace && e.name == name));
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().unwrap().len()
    }

    pub fn pod_count(&self) -> usize {
        self.pods.lock().unwrap().len()
    }

    /// Run `f` over every endpoint whose identities match `selector`,
    /// collecting the `(namespace, name)` keys touched. Used by the policy
    /// reconciliation path to know which endpoints to notify.
    pub fn for_each_matching_endpoint(
        &self,
        selector: &[String],
        mut f: impl FnMut(&mut Endpoint),
    ) -> Vec<(String, String)> {
        let mut endpoints = self.endpoints.lock().unwrap();
        let mut touched = Vec::new();
        for endpoint in endpoints.iter_mut() {
            if crate::identity::matches(selector, &endpoint.identities) {
                f(endpoint);
                touched.push(endpoint.key());
            }
        }
        touched
    }

    /* ============================= CONTAINERS ============================= */

    /// Join container-ids against the `containers` collection, writing back
    /// namespace/name/policy-mode/visibility and reading the current
    /// `apparmor_profile` into the returned map.
    pub fn join_containers(
        &self,
        container_ids: &[String],
        namespace: &str,
        name: &str,
        policy_mode: Option<crate::model::PolicyMode>,
        visibility: crate::model::Visibility,
    ) -> std::collections::BTreeMap<String, String> {
        let mut containers = self.containers.lock().unwrap();
        let mut apparmor_profiles = std::collections::BTreeMap::new();

        for cid in container_ids {
            let container = containers.entry(cid.clone()).or_default();
            container.namespace = namespace.to_string();
            container.name = name.to_string();
            container.policy_mode = policy_mode;
            container.process_visibility = visibility.process;
            container.file_visibility = visibility.file;
            container.network_visibility = visibility.network;
            container.capabilities_visibility = visibility.capabilities;
            apparmor_profiles.insert(cid.clone(), container.apparmor_profile.clone());
        }

        apparmor_profiles
    }

    /* ============================= WORKLOAD POLICIES ============================= */

    pub fn get_security_policies(&self, identities: &[String]) -> Vec<NormalizedSecurityPolicy> {
        let policies = self.workload_policies.lock().unwrap();
        policies
            .iter()
            .filter(|p| crate::identity::matches(&p.spec.selector.identities, identities))
            .cloned()
            .collect()
    }

    /// ADDED: append if not already present (deep-equality dedup). Returns
    /// whether it was actually inserted.
    pub fn add_workload_policy(&self, policy: NormalizedSecurityPolicy) -> bool {
        let mut policies = self.workload_policies.lock().unwrap();
        if policies.contains(&policy) {
            return false;
        }
        policies.push(policy);
        true
    }

    /// MODIFIED: replace the entry matching `(namespace, policyName)`.
    /// Returns whether an existing entry was found and replaced.
    pub fn replace_workload_policy(&self, policy: NormalizedSecurityPolicy) -> bool {
        let mut policies = self.workload_policies.lock().unwrap();
        if let Some(existing) = policies.iter_mut().find(|p| p.key() == policy.key()) {
            *existing = policy;
            true
        } else {
            false
        }
    }

    /// DELETED: remove the deep-equal entry (not by key — preserved source
    /// asymmetry, see DESIGN.md).
    pub fn remove_workload_policy(&self, policy: &NormalizedSecurityPolicy) {
        let mut policies = self.workload_policies.lock().unwrap();
        if let Some(idx) = policies.iter().position(|p| p == policy) {
            policies.remove(idx);
        }
    }

    /* ============================= HOST POLICIES ============================= */

    pub fn add_host_policy(&self, policy: NormalizedHostSecurityPolicy) -> bool {
        let mut policies = self.host_policies.lock().unwrap();
        if policies.contains(&policy) {
            return false;
        }
        policies.push(policy);
        true
    }

    pub fn replace_host_policy(&self, policy: NormalizedHostSecurityPolicy) -> bool {
        let mut policies = self.host_policies.lock().unwrap();
        if let Some(existing) = policies
            .iter_mut()
            .find(|p| p.policy_name == policy.policy_name)
        {
            *existing = policy;
            true
        } else {
            false
        }
    }

    pub fn remove_host_policy(&self, policy: &NormalizedHostSecurityPolicy) {
        let mut policies = self.host_policies.lock().unwrap();
        if let Some(idx) = policies.iter().position(|p| p == policy) {
            policies.remove(idx);
        }
    }

    pub fn host_policy_projection(&self, node_identities: &[String]) -> Vec<NormalizedHostSecurityPolicy> {
        let policies = self.host_policies.lock().unwrap();
        policies
            .iter()
            .filter(|p| crate::identity::matches(&p.spec.node_selector.identities, node_identities))
            .cloned()
            .collect()
    }
}
