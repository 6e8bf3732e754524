//! Runtime enforcer — the collaborator that would translate policies into
//! in-kernel LSM rules. Actual enforcement is a non-goal here; the
//! variants below report what they *would* enforce via the feeder's log
//! channel, and otherwise satisfy the same capability contract a real
//! enforcer would.

use async_trait::async_trait;

use crate::crd::NormalizedHostSecurityPolicy;
use crate::model::{Endpoint, Pod};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcerType {
    AppArmor,
    SELinux,
    None,
}

impl EnforcerType {
    pub fn as_str(self) -> &'static str {
        match self {
            EnforcerType::AppArmor => "apparmor",
            EnforcerType::SELinux => "selinux",
            EnforcerType::None => "none",
        }
    }
}

#[async_trait]
pub trait Enforcer: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn enforcer_type(&self) -> EnforcerType;

    async fn update_security_profiles(&self, action: &str, pod: &Pod, register: bool);
    async fn update_security_policies(&self, endpoint: &Endpoint);
    async fn update_host_security_policies(&self, policies: &[NormalizedHostSecurityPolicy]);
}

/* ============================= APPARMOR ============================= */

pub struct AppArmorEnforcer;

#[async_trait]
impl Enforcer for AppArmorEnforcer {
    fn is_enabled(&self) -> bool {
        true
    }

    fn enforcer_type(&self) -> EnforcerType {
        EnforcerType::AppArmor
    }

    async fn update_security_profiles(&self, action: &str, pod: &Pod, register: bool) {
        tracing::info!(
            action,
            register,
            namespace = %pod.namespace,
            pod = %pod.name,
            "apparmor_profiles_would_update"
        );
    }

    async fn update_security_policies(&self, endpoint: &Endpoint) {
        tracing::info!(
            namespace = %endpoint.namespace,
            endpoint = %endpoint.name,
            policy_count = endpoint.security_policies.len(),
            "apparmor_security_policies_would_update"
        );
    }

    async fn update_host_security_policies(&self, policies: &[NormalizedHostSecurityPolicy]) {
        tracing::info!(policy_count = policies.len(), "apparmor_host_policies_would_update");
    }
}

/* ============================= SELINUX ============================= */

pub struct SELinuxEnforcer;

#[async_trait]
impl Enforcer for SELinuxEnforcer {
    fn is_enabled(&self) -> bool {
        true
    }

    fn enforcer_type(&self) -> EnforcerType {
        EnforcerType::SELinux
    }

    async fn update_security_profiles(&self, action: &str, pod: &Pod, register: bool) {
        tracing::info!(
            action,
            register,
            namespace = %pod.namespace,
            pod = %pod.name,
            "selinux_profiles_would_update"
        );
    }

    async fn update_security_policies(&self, endpoint: &Endpoint) {
        tracing::info!(
            namespace = %endpoint.namespace,
            endpoint = %endpoint.name,
            policy_count = endpoint.security_policies.len(),
            "selinux_security_policies_would_update"
        );
    }

    async fn update_host_security_policies(&self, policies: &[NormalizedHostSecurityPolicy]) {
        tracing::info!(policy_count = policies.len(), "selinux_host_policies_would_update");
    }
}

/* ============================= NO-OP ============================= */

pub struct NoOpEnforcer;

#[async_trait]
impl Enforcer for NoOpEnforcer {
    fn is_enabled(&self) -> bool {
        false
    }

    fn enforcer_type(&self) -> EnforcerType {
        EnforcerType::None
    }

    async fn update_security_profiles(&self, _action: &str, _pod: &Pod, _register: bool) {}
    async fn update_security_policies(&self, _endpoint: &Endpoint) {}
    async fn update_host_security_policies(&self, _policies: &[NormalizedHostSecurityPolicy]) {}
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_enforcer_is_disabled() {
        let e = NoOpEnforcer;
        assert!(!e.is_enabled());
        assert_eq!(e.enforcer_type(), EnforcerType::None);
    }

    #[test]
    fn apparmor_enforcer_is_enabled_with_matching_type() {
        let e = AppArmorEnforcer;
        assert!(e.is_enabled());
        assert_eq!(e.enforcer_type(), EnforcerType::AppArmor);
    }

    #[test]
    fn selinux_enforcer_is_enabled_with_matching_type() {
        let e = SELinuxEnforcer;
        assert!(e.is_enabled());
        assert_eq!(e.enforcer_type(), EnforcerType::SELinux);
    }

    #[test]
    fn enforcer_type_as_str_matches_wire_values() {
        assert_eq!(EnforcerType::AppArmor.as_str(), "apparmor");
        assert_eq!(EnforcerType::SELinux.as_str(), "selinux");
        assert_eq!(EnforcerType::None.as_str(), "none");
    }

    #[tokio::test]
    async fn noop_enforcer_calls_are_inert() {
        let e = NoOpEnforcer;
        let pod = Pod::default();
        e.update_security_profiles("ADDED", &pod, true).await;
        e.update_security_policies(&Endpoint::default()).await;
        e.update_host_security_policies(&[]).await;
    }
}
