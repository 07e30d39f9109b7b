//! Local development provisioning on minikube
//!
//! Brings a single-node cluster up, enables ingress, installs the package
//! manager, the traefik dashboard chart and the private registry, and
//! optionally applies a bundled example workload. The flow assumes a fresh
//! cluster: installs are create-only, and re-running against an already
//! provisioned cluster can fail on duplicate release names.

use tracing::info;

use crate::exec::CommandRunner;
use crate::prompt::PromptSource;
use crate::Result;

/// Example workload applied when the operator opts in
const EXAMPLE_APP_MANIFEST: &str = include_str!("../../config/deployment-minikube.yaml");

/// Run the local development flow
pub async fn provision(runner: &dyn CommandRunner, prompt: &dyn PromptSource) -> Result<()> {
    println!("Note: Minikube is for development purposes only.");

    // A failed status probe means the cluster needs starting, not that the
    // flow failed.
    if let Err(probe) = runner.run("minikube", &["status"]).await {
        info!(error = %probe, "minikube not running");
        println!("Starting Minikube. This may take a minute.");
        runner.run("minikube", &["start"]).await?;
    }

    runner
        .run("minikube", &["addons", "enable", "ingress"])
        .await?;
    runner.run("helm", &["init", "--wait"]).await?;

    let minikube_ip = runner.run("minikube", &["ip"]).await?.trimmed().to_string();

    runner
        .run(
            "helm",
            &[
                "install",
                "stable/traefik",
                "--name",
                "traefik",
                "--namespace",
                "kube-system",
                "--set",
                "serviceType=NodePort",
                "--set",
                "dashboard.enabled=true",
                "--set",
                "dashboard.domain=traefik-ui.minikube",
            ],
        )
        .await?;
    println!(
        "Add \"{minikube_ip} traefik-ui.minikube\" to your hosts file to access traefik's dashboard."
    );

    runner
        .run(
            "helm",
            &["install", "stable/docker-registry", "--name", "docker-registry"],
        )
        .await?;

    if prompt.confirm("Install an example app on Minikube")? {
        runner
            .run_with_stdin("kubectl", &["apply", "-f", "-"], EXAMPLE_APP_MANIFEST)
            .await?;
        println!("Add \"{minikube_ip} whoami.minikube\" to your hosts file to access example app.");
    }

    println!("Creation complete. It may take a few minutes for services to become available.");
    Ok(())
}
