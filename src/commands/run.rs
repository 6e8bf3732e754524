use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use kube::Client;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

use kube_sentry::enforcement::{AppArmorEnforcer, Enforcer, NoOpEnforcer, SELinuxEnforcer};
use kube_sentry::feeder::{Feeder, TracingFeeder};
use kube_sentry::k8s::{K8sClient, KubeClient};
use kube_sentry::reconciler::PodReconcileConfig;
use kube_sentry::store::Store;
use kube_sentry::watcher;

use crate::cli::EnforcerArg;

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static PODS_TRACKED: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new("pods_tracked_total", "Pods currently tracked by the reconciler")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

static ENDPOINTS_TRACKED: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new("endpoints_tracked_total", "Endpoints currently tracked by the reconciler")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

#[allow(clippy::too_many_arguments)]
pub async fn run(
    addr: String,
    enforcer_arg: EnforcerArg,
    per_pod_enforcer: bool,
    lsm_path: String,
    node_name: Option<String>,
) -> Result<()> {
    info!("engine_starting");

    let client = Client::try_default()
        .await
        .context("Failed to connect to Kubernetes cluster")?;

    let node_name = node_name.context("NODE_NAME must be set (or pass --node-name)")?;

    let store = Arc::new(Store::new());
    let k8s: Arc<dyn K8sClient> = Arc::new(KubeClient::new(client, node_name));
    let feeder: Arc<dyn Feeder> = Arc::new(TracingFeeder);
    let enforcer: Arc<dyn Enforcer> = match enforcer_arg {
        EnforcerArg::Apparmor => Arc::new(AppArmorEnforcer),
        EnforcerArg::Selinux => Arc::new(SELinuxEnforcer),
        EnforcerArg::None => Arc::new(NoOpEnforcer),
    };

    let config = PodReconcileConfig {
        per_pod_enforcer,
        lsm_path,
    };

    let bind_addr: SocketAddr = addr.parse().context("invalid --addr")?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let pod_handle = tokio::spawn(watcher::run_pod_watcher(
        store.clone(),
        k8s.clone(),
        enforcer.clone(),
        feeder.clone(),
        config,
        shutdown_tx.subscribe(),
    ));

    let policy_handle = tokio::spawn(watcher::run_policy_watcher(
        store.clone(),
        k8s.clone(),
        enforcer.clone(),
        feeder.clone(),
        shutdown_tx.subscribe(),
    ));

    let host_policy_handle = tokio::spawn(watcher::run_host_policy_watcher(
        store.clone(),
        k8s.clone(),
        enforcer.clone(),
        feeder.clone(),
        shutdown_tx.subscribe(),
    ));

    let http_shutdown = shutdown_tx.subscribe();
    let http_store = store.clone();
    let http_handle = tokio::spawn(async move { start_http_server(http_store, bind_addr, http_shutdown).await });

    info!(addr = %bind_addr, "http_server_started");
    println!("kube-sentry running. HTTP server on http://{bind_addr}. Press Ctrl+C to stop.");

    signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(());

    let _ = pod_handle.await;
    let _ = policy_handle.await;
    let _ = host_policy_handle.await;
    let _ = http_handle.await?;

    info!("engine_stopped");
    Ok(())
}

fn build_router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/metrics", get(move || metrics_handler(store.clone())))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route("/readyz", get(|| async { (StatusCode::OK, "READY") }))
}

async fn start_http_server(store: Arc<Store>, addr: SocketAddr, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let app = build_router(store);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP server on {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

async fn metrics_handler(store: Arc<Store>) -> impl IntoResponse {
    PODS_TRACKED.set(store.pod_count() as i64);
    ENDPOINTS_TRACKED.set(store.endpoint_count() as i64);

    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    match encoder.encode(&families, &mut buffer) {
        Ok(()) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
        },
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
    }
}
