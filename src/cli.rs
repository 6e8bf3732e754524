use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kube-sentry")]
#[command(about = "Node-local policy reconciliation engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the reconciliation engine
    Run {
        /// HTTP bind address for /metrics, /healthz, /readyz
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,

        /// Enforcer backend to report as active
        #[arg(long, value_enum, default_value = "none")]
        enforcer: EnforcerArg,

        /// Require an explicit per-pod kubearmor-policy annotation instead
        /// of defaulting every pod to enabled
        #[arg(long)]
        per_pod_enforcer: bool,

        /// Path to the LSM sysfs file consulted during AppArmor gating
        #[arg(long, default_value = "/sys/kernel/security/lsm")]
        lsm_path: String,

        /// Node name used to resolve this node's identities
        #[arg(long, env = "NODE_NAME")]
        node_name: Option<String>,
    },

    /// Check cluster connectivity and permissions
    Check,

    /// List Kubernetes resources (e.g. pods)
    List {
        /// Resource type to list (pods)
        resource: String,
    },

    /// Manage the SecurityPolicy/HostSecurityPolicy CRDs
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum EnforcerArg {
    Apparmor,
    Selinux,
    None,
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print both CRDs' YAML to stdout
    Generate,

    /// Install both CRDs into the connected cluster
    Install,
}
