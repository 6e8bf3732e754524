//! Workload `SecurityPolicy` event handling: normalize, upsert into the
//! store, and push the recomputed projection to every endpoint whose
//! identities match the policy's selector.

use crate::crd::NormalizedSecurityPolicy;
use crate::enforcement::Enforcer;
use crate::feeder::Feeder;
use crate::k8s::{EventKind, PolicyEvent};
use crate::model::Endpoint;
use crate::store::Store;

pub async fn handle_policy_event(event: PolicyEvent, store: &Store, enforcer: &dyn Enforcer, feeder: &dyn Feeder) {
    let namespace = event.policy.metadata.namespace.clone().unwrap_or_default();
    let Some(policy_name) = event.policy.metadata.name.clone() else {
        return;
    };
    let spec = crate::normalize::normalize_security_policy(event.policy.spec, &namespace);
    let normalized = NormalizedSecurityPolicy {
        namespace,
        policy_name,
        spec,
    };

    let selector = normalized.spec.selector.identities.clone();

    match event.kind {
        EventKind::Added => {
            store.add_workload_policy(normalized);
        }
        EventKind::Modified => {
            store.replace_workload_policy(normalized);
        }
        EventKind::Deleted => {
            store.remove_workload_policy(&normalized);
        }
    }

    let touched = store.for_each_matching_endpoint(&selector, |endpoint| {
        endpoint.security_policies = Vec::new();
    });

    for (namespace, name) in touched {
        let Some(mut endpoint) = store.find_endpoint(&namespace, &name) else {
            continue;
        };
        endpoint.security_policies = store.get_security_policies(&endpoint.identities);
        store.replace_endpoint(endpoint.clone());
        notify(&endpoint, enforcer, feeder).await;
    }
}

async fn notify(endpoint: &Endpoint, enforcer: &dyn Enforcer, feeder: &dyn Feeder) {
    feeder.update_security_policies("UPDATED", endpoint).await;
    enforcer.update_security_policies(endpoint).await;
}
