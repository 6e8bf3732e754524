mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, CrdAction, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            addr,
            enforcer,
            per_pod_enforcer,
            lsm_path,
            node_name,
        } => {
            commands::run::run(addr, enforcer, per_pod_enforcer, lsm_path, node_name).await?;
        }
        Commands::Check => commands::check::run().await?,
        Commands::List { resource } => {
            commands::list::run(resource).await?;
        }
        Commands::Crd { action } => match action {
            CrdAction::Generate => commands::crd::generate()?,
            CrdAction::Install => commands::crd::install().await?,
        },
    }

    Ok(())
}
