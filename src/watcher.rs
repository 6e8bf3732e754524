//! Watcher Loops — three long-lived supervisors (pod, workload policy, host
//! policy), each owning its own reconnect/backoff and dispatching decoded
//! events to the reconciler strictly one at a time.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::warn;

use crate::enforcement::Enforcer;
use crate::feeder::Feeder;
use crate::k8s::K8sClient;
use crate::reconciler::{host_policies, pods, policies, PodReconcileConfig};
use crate::store::Store;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Watches pods and dispatches every decoded event to the reconciler.
/// Pods aren't CRD-backed, so there's no existence probe: the loop goes
/// straight to opening the watch.
pub async fn run_pod_watcher(
    store: Arc<Store>,
    k8s: Arc<dyn K8sClient>,
    enforcer: Arc<dyn Enforcer>,
    feeder: Arc<dyn Feeder>,
    config: PodReconcileConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let mut stream = loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                opened = k8s.watch_pods() => {
                    match opened {
                        Ok(stream) => break stream,
                        Err(e) => {
                            warn!(error = %e, "pod_watch_open_failed");
                            sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => {
                            pods::handle_pod_event(event, &store, enforcer.as_ref(), feeder.as_ref(), k8s.as_ref(), &config).await;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "pod_watch_decode_error");
                            break;
                        }
                        None => {
                            warn!("pod_watch_stream_ended");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Watches `SecurityPolicy`. CRD-backed: probes existence before opening
/// the watch, retrying every second while the CRD is absent.
pub async fn run_policy_watcher(
    store: Arc<Store>,
    k8s: Arc<dyn K8sClient>,
    enforcer: Arc<dyn Enforcer>,
    feeder: Arc<dyn Feeder>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        if !wait_for_crd(&*k8s, "SecurityPolicy", &mut shutdown).await {
            return;
        }

        let mut stream = loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                opened = k8s.watch_security_policies() => {
                    match opened {
                        Ok(stream) => break stream,
                        Err(e) => {
                            warn!(error = %e, "policy_watch_open_failed");
                            sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => {
                            if skip_not_ok(event.policy.status.as_ref().and_then(|s| s.status.as_deref())) {
                                continue;
                            }
                            policies::handle_policy_event(event, &store, enforcer.as_ref(), feeder.as_ref()).await;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "policy_watch_decode_error");
                            break;
                        }
                        None => {
                            warn!("policy_watch_stream_ended");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Watches `HostSecurityPolicy`. Same CRD-probe/reconnect shape as the
/// workload-policy watcher.
pub async fn run_host_policy_watcher(
    store: Arc<Store>,
    k8s: Arc<dyn K8sClient>,
    enforcer: Arc<dyn Enforcer>,
    feeder: Arc<dyn Feeder>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        if !wait_for_crd(&*k8s, "HostSecurityPolicy", &mut shutdown).await {
            return;
        }

        let mut stream = loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                opened = k8s.watch_host_security_policies() => {
                    match opened {
                        Ok(stream) => break stream,
                        Err(e) => {
                            warn!(error = %e, "host_policy_watch_open_failed");
                            sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => {
                            if skip_not_ok(event.policy.status.as_ref().and_then(|s| s.status.as_deref())) {
                                continue;
                            }
                            host_policies::handle_host_policy_event(event, &store, k8s.as_ref(), enforcer.as_ref(), feeder.as_ref()).await;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "host_policy_watch_decode_error");
                            break;
                        }
                        None => {
                            warn!("host_policy_watch_stream_ended");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Returns `false` if shutdown fired while waiting for the CRD to appear.
async fn wait_for_crd(k8s: &dyn K8sClient, kind: &str, shutdown: &mut broadcast::Receiver<()>) -> bool {
    loop {
        tokio::select! {
            _ = shutdown.recv() => return false,
            present = k8s.check_custom_resource_definition(kind) => {
                match present {
                    Ok(true) => return true,
                    Ok(false) => {
                        warn!(kind, "crd_absent_retrying");
                        sleep(RECONNECT_DELAY).await;
                    }
                    Err(e) => {
                        warn!(kind, error = %e, "crd_probe_failed");
                        sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }
    }
}

/// Objects carrying a `status.status` set to anything but `"OK"` are
/// skipped; a pristine/absent status always passes.
fn skip_not_ok(status: Option<&str>) -> bool {
    matches!(status, Some(s) if s != "OK")
}
