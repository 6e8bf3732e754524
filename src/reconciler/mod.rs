//! Reconciler — applies the three normalized event streams to the
//! [`crate::store::Store`], recomputes per-endpoint policy projections, and
//! notifies the [`crate::enforcement::Enforcer`] /
//! [`crate::feeder::Feeder`] collaborators. Split by stream for
//! testability; each submodule takes `&Store` plus the collaborator trait
//! objects rather than owning them.

pub mod host_policies;
pub mod pods;
pub mod policies;

/// Toggles the pod-event pre-reconcile derivations that depend on whether
/// enforcement is opted into per-pod (`annotation present`) or applies to
/// all pods by default.
#[derive(Debug, Clone)]
pub struct PodReconcileConfig {
    pub per_pod_enforcer: bool,
    pub lsm_path: String,
}

impl Default for PodReconcileConfig {
    fn default() -> Self {
        Self {
            per_pod_enforcer: false,
            lsm_path: "/sys/kernel/security/lsm".to_string(),
        }
    }
}
