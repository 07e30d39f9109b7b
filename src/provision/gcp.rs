//! Cloud provisioning on GCP
//!
//! Brings a managed cluster from absent to ready-for-deployment: a
//! mutual-TLS package manager, the nginx ingress controller, cert-manager
//! with a production ACME issuer, and a private registry whose credentials
//! are mirrored into the cluster.
//!
//! The cluster-level create is the only precondition-checked step; every
//! other named resource is created unconditionally, so the flow is run at
//! most once per cluster. Every failure is a hard stop with no rollback.

use tracing::{info, warn};

use crate::exec::{cluster_exists, is_authenticated, CommandOutput, CommandRunner};
use crate::pki::CertificateWorkspace;
use crate::prompt::PromptSource;
use crate::registry::{self, RegistryCredential, REGISTRY_HTPASSWD};
use crate::{manifest, Error, Result, CLUSTER_NAME, CLUSTER_ZONE};

/// OAuth scopes granted to cluster nodes
const NODE_SCOPES: &str = "https://www.googleapis.com/auth/devstorage.read_only,\
https://www.googleapis.com/auth/logging.write,\
https://www.googleapis.com/auth/monitoring,\
https://www.googleapis.com/auth/service.management.readonly,\
https://www.googleapis.com/auth/servicecontrol,\
https://www.googleapis.com/auth/trace.append";

/// The GCP provisioning flow
pub struct GcpProvisioner<'a> {
    runner: &'a dyn CommandRunner,
    prompt: &'a dyn PromptSource,
}

impl<'a> GcpProvisioner<'a> {
    /// Create a provisioner over the given runner and prompt source
    pub fn new(runner: &'a dyn CommandRunner, prompt: &'a dyn PromptSource) -> Self {
        Self { runner, prompt }
    }

    /// Run the whole flow
    pub async fn provision(&self) -> Result<()> {
        self.ensure_authenticated().await?;
        let project_id = self.project_id().await?;

        self.runner
            .run(
                "gcloud",
                &["services", "enable", "container.googleapis.com"],
            )
            .await?;

        self.ensure_cluster(&project_id).await?;

        let workspace = CertificateWorkspace::resolve(self.runner).await?;
        println!("Generating TLS material under {}...", workspace.root().display());
        workspace.bootstrap(self.runner).await?;

        self.create_tiller_rbac().await?;

        println!("Installing the package manager with mutual TLS...");
        self.install_package_manager(&workspace).await?;

        println!("Installing ingress controller and certificate issuer charts...");
        self.install_ingress_chart(&workspace).await?;
        self.install_cert_manager_chart(&workspace).await?;

        let email = self.capture_acme_email()?;
        self.create_resource(&manifest::cluster_issuer(&email)).await?;
        self.create_resource(&manifest::global_ingress()).await?;
        self.create_resource(&manifest::registry_pvc()).await?;

        println!("Installing the private registry...");
        self.install_registry_chart(&workspace).await?;

        let credential = RegistryCredential::fixed();
        let cluster_ip = registry::cluster_ip(self.runner).await?;
        registry::create_pull_secret(self.runner, &cluster_ip, &credential).await?;
        registry::create_config_map(self.runner, &cluster_ip, &credential).await?;

        println!("Creation complete. It may take a few minutes for services to become available.");
        Ok(())
    }

    /// Make sure an account is active, logging in again when the listing
    /// shows none or cannot be read at all
    async fn ensure_authenticated(&self) -> Result<()> {
        match self.runner.run("gcloud", &["auth", "list"]).await {
            Ok(listing) if is_authenticated(&listing.stdout) => Ok(()),
            Ok(_) => {
                info!("no active account in auth listing");
                self.login().await
            }
            Err(e) => {
                warn!(error = %e, "auth listing failed, re-authenticating");
                self.login().await
            }
        }
    }

    async fn login(&self) -> Result<()> {
        self.runner.run("gcloud", &["auth", "login"]).await?;
        Ok(())
    }

    async fn project_id(&self) -> Result<String> {
        let output = self
            .runner
            .run("gcloud", &["config", "get-value", "project"])
            .await?;
        Ok(output.trimmed().to_string())
    }

    /// Create the managed cluster unless the listing already names it
    async fn ensure_cluster(&self, project_id: &str) -> Result<()> {
        let listing = self
            .runner
            .run("gcloud", &["container", "clusters", "list"])
            .await?;
        if cluster_exists(&listing.stdout, CLUSTER_NAME) {
            info!(cluster = CLUSTER_NAME, "cluster already exists");
            return Ok(());
        }

        println!("Creating cluster \"{CLUSTER_NAME}\". This may take several minutes.");
        let network = format!("projects/{project_id}/global/networks/default");
        let subnetwork =
            format!("projects/{project_id}/regions/us-west1/subnetworks/default");
        self.runner
            .run(
                "gcloud",
                &[
                    "beta",
                    "container",
                    "clusters",
                    "create",
                    CLUSTER_NAME,
                    "--zone",
                    CLUSTER_ZONE,
                    "--no-enable-basic-auth",
                    "--cluster-version",
                    "1.11.5-gke.5",
                    "--image-type",
                    "COS",
                    "--machine-type",
                    "f1-micro",
                    "--disk-type",
                    "pd-standard",
                    "--disk-size",
                    "10",
                    "--default-max-pods-per-node",
                    "110",
                    "--num-nodes",
                    "3",
                    "--enable-cloud-logging",
                    "--enable-cloud-monitoring",
                    "--enable-ip-alias",
                    "--network",
                    &network,
                    "--subnetwork",
                    &subnetwork,
                    "--addons",
                    "HorizontalPodAutoscaling,HttpLoadBalancing",
                    "--enable-autoupgrade",
                    "--enable-autorepair",
                    "--scopes",
                    NODE_SCOPES,
                ],
            )
            .await?;
        Ok(())
    }

    /// Service account and cluster-admin binding for the package manager
    /// server. Create-only; re-running conflicts.
    async fn create_tiller_rbac(&self) -> Result<()> {
        self.runner
            .run(
                "kubectl",
                &[
                    "create",
                    "serviceaccount",
                    "--namespace",
                    "kube-system",
                    "tiller",
                ],
            )
            .await?;
        self.runner
            .run(
                "kubectl",
                &[
                    "create",
                    "clusterrolebinding",
                    "tiller-cluster-rule",
                    "--clusterrole=cluster-admin",
                    "--serviceaccount=kube-system:tiller",
                ],
            )
            .await?;
        Ok(())
    }

    /// Install tiller with mutual TLS and verify it answers over the same
    /// identities. Install and verification failures surface as one
    /// bootstrap condition.
    async fn install_package_manager(&self, workspace: &CertificateWorkspace) -> Result<()> {
        self.try_install_package_manager(workspace)
            .await
            .map_err(|e| Error::command("package manager bootstrap", e.to_string()))?;
        Ok(())
    }

    async fn try_install_package_manager(
        &self,
        workspace: &CertificateWorkspace,
    ) -> Result<()> {
        let init_args: Vec<String> = vec![
            "init".into(),
            "--debug".into(),
            "--tiller-tls".into(),
            "--tiller-tls-cert".into(),
            workspace.server.cert.display().to_string(),
            "--tiller-tls-key".into(),
            workspace.server.key.display().to_string(),
            "--tiller-tls-verify".into(),
            "--tls-ca-cert".into(),
            workspace.ca.cert.display().to_string(),
            "--service-account".into(),
            "tiller".into(),
            "--wait".into(),
        ];
        self.run_helm(init_args).await?;

        let mut verify_args: Vec<String> = vec!["ls".into()];
        verify_args.extend(workspace.client_tls_args());
        self.run_helm(verify_args).await?;
        Ok(())
    }

    async fn install_ingress_chart(&self, workspace: &CertificateWorkspace) -> Result<()> {
        let mut args: Vec<String> = vec!["install".into(), "stable/nginx-ingress".into()];
        args.extend(workspace.client_tls_args());
        args.extend(
            [
                "--namespace",
                "kube-system",
                "--name",
                "nginx-ingress",
                "--set",
                "controller.ingressClass=nginx",
                "--set",
                "rbac.create=true",
            ]
            .map(String::from),
        );
        self.run_helm(args).await?;
        Ok(())
    }

    async fn install_cert_manager_chart(&self, workspace: &CertificateWorkspace) -> Result<()> {
        let mut args: Vec<String> = vec!["install".into(), "stable/cert-manager".into()];
        args.extend(workspace.client_tls_args());
        args.extend(
            [
                "--namespace",
                "kube-system",
                "--name",
                "cert-manager",
                "--set",
                "ingressShim.defaultIssuerName=letsencrypt-prod",
                "--set",
                "ingressShim.defaultIssuerKind=ClusterIssuer",
            ]
            .map(String::from),
        );
        self.run_helm(args).await?;
        Ok(())
    }

    async fn install_registry_chart(&self, workspace: &CertificateWorkspace) -> Result<()> {
        let mut args: Vec<String> = vec!["install".into(), "stable/docker-registry".into()];
        args.extend(workspace.client_tls_args());
        args.extend(
            [
                "--namespace".to_string(),
                "default".to_string(),
                "--name".to_string(),
                "docker-registry".to_string(),
                "--set".to_string(),
                format!("secrets.htpasswd={REGISTRY_HTPASSWD}"),
                "--set".to_string(),
                "persistence.enabled=true".to_string(),
                "--set".to_string(),
                "persistence.existingClaim=docker-registry-pvc".to_string(),
            ],
        );
        self.run_helm(args).await?;
        Ok(())
    }

    /// Ask for the ACME contact address until the operator confirms it.
    /// Any confirmed non-empty string is accepted.
    fn capture_acme_email(&self) -> Result<String> {
        let question = "Provide an email address for Let's Encrypt";
        let mut email = self.prompt.ask(question)?;
        while !self.prompt.confirm(&format!("Confirm email: \"{email}\""))? {
            email = self.prompt.ask(question)?;
        }
        Ok(email)
    }

    /// Pipe a resource definition to `kubectl create -f -`. Unconditional:
    /// an existing resource of the same name is a conflict, not a success.
    async fn create_resource(&self, resource: &serde_json::Value) -> Result<()> {
        self.runner
            .run_with_stdin("kubectl", &["create", "-f", "-"], &manifest::render(resource)?)
            .await?;
        Ok(())
    }

    async fn run_helm(&self, args: Vec<String>) -> Result<CommandOutput> {
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.runner.run("helm", &refs).await
    }
}
