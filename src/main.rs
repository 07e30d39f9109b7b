//! Snow CLI - provision clusters and build images in-cluster

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use snow::deploy::BuildPipeline;
use snow::exec::ShellRunner;
use snow::prompt::TerminalPrompt;
use snow::provision;

/// Snow - Kubernetes cluster provisioning and daemonless in-cluster image builds
#[derive(Parser, Debug)]
#[command(name = "snow", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision a cluster on minikube or GCP
    ///
    /// Asks which provider to target, then brings the cluster from absent or
    /// unconfigured to ready-for-deployment: package manager, ingress
    /// controller, certificate issuer (GCP), and a private registry.
    Create,

    /// Build and push the current project's image in-cluster
    ///
    /// Packages the Dockerfile and the files listed in now.json into a build
    /// context, ships it to a builder pod, and waits for the image to be
    /// pushed to the private registry.
    Deploy(DeployArgs),
}

/// Deploy mode arguments
#[derive(Parser, Debug)]
struct DeployArgs {
    /// Project directory containing Dockerfile and now.json
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Delete the builder pod after a successful build
    #[arg(long)]
    cleanup: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let runner = ShellRunner;

    match cli.command {
        Commands::Create => {
            let prompt = TerminalPrompt;
            provision::run(&runner, &prompt)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))
        }
        Commands::Deploy(args) => BuildPipeline::new(&runner, args.project_dir)
            .with_cleanup(args.cleanup)
            .run()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e)),
    }
}
