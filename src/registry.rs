//! Private registry discovery and credential propagation
//!
//! The registry chart is installed by the provisioning flows; this module
//! discovers its in-cluster endpoint and mirrors the fixed credential pair
//! into the two resources consumers need: the `regcred` pull secret and the
//! `docker-config` ConfigMap the builder mounts. Both must encode the same
//! pair or in-cluster image pulls fail even though the build reported
//! success.

use crate::exec::CommandRunner;
use crate::{manifest, Result, REGISTRY_PORT, REGISTRY_SERVICE};

/// Username baked into the registry chart values
pub const REGISTRY_USERNAME: &str = "user";

/// Password matching [`REGISTRY_HTPASSWD`]
pub const REGISTRY_PASSWORD: &str = "password";

/// htpasswd entry (bcrypt) the registry chart is installed with
pub const REGISTRY_HTPASSWD: &str =
    "user:$2y$05$8nR6bYM2ZKR0tkmJ9KEVTeWVVk77sucXVwZQp2q49t6sR0Oip346C";

/// Username/password pair embedded in the registry and mirrored into the
/// cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredential {
    /// Registry username
    pub username: String,
    /// Registry password
    pub password: String,
}

impl RegistryCredential {
    /// The fixed credential the registry chart is provisioned with
    pub fn fixed() -> Self {
        Self {
            username: REGISTRY_USERNAME.to_string(),
            password: REGISTRY_PASSWORD.to_string(),
        }
    }
}

/// Reachable address of the registry for a discovered cluster IP
pub fn endpoint(cluster_ip: &str) -> String {
    format!("{cluster_ip}:{REGISTRY_PORT}")
}

/// Discover the registry's cluster-internal IP
///
/// Queries the service created by the registry chart; the service must
/// already exist, which is the provisioning flow's responsibility.
pub async fn cluster_ip(runner: &dyn CommandRunner) -> Result<String> {
    let output = runner
        .run(
            "kubectl",
            &[
                "get",
                &format!("service/{REGISTRY_SERVICE}"),
                "-o",
                "jsonpath={.spec.clusterIP}",
            ],
        )
        .await?;
    Ok(output.trimmed().to_string())
}

/// Create the `regcred` pull secret for the discovered registry endpoint
pub async fn create_pull_secret(
    runner: &dyn CommandRunner,
    cluster_ip: &str,
    credential: &RegistryCredential,
) -> Result<()> {
    runner
        .run(
            "kubectl",
            &[
                "create",
                "secret",
                "docker-registry",
                "regcred",
                &format!("--docker-server={}", endpoint(cluster_ip)),
                &format!("--docker-username={}", credential.username),
                &format!("--docker-password={}", credential.password),
            ],
        )
        .await?;
    Ok(())
}

/// Create the `docker-config` ConfigMap mirroring the same credential pair
pub async fn create_config_map(
    runner: &dyn CommandRunner,
    cluster_ip: &str,
    credential: &RegistryCredential,
) -> Result<()> {
    let config_map = manifest::registry_config_map(
        &endpoint(cluster_ip),
        &credential.username,
        &credential.password,
    );
    runner
        .run_with_stdin(
            "kubectl",
            &["create", "-f", "-"],
            &manifest::render(&config_map)?,
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::fake::FakeRunner;

    #[tokio::test]
    async fn cluster_ip_is_trimmed_service_output() {
        let runner = FakeRunner::new().with_output(
            "kubectl get service/docker-registry -o jsonpath={.spec.clusterIP}",
            "10.0.0.7\n",
        );
        assert_eq!(cluster_ip(&runner).await.unwrap(), "10.0.0.7");
    }

    #[tokio::test]
    async fn pull_secret_and_config_map_encode_the_same_pair() {
        let runner = FakeRunner::new();
        let credential = RegistryCredential::fixed();

        create_pull_secret(&runner, "10.0.0.7", &credential)
            .await
            .unwrap();
        create_config_map(&runner, "10.0.0.7", &credential)
            .await
            .unwrap();

        let calls = runner.calls();
        let secret_cmd = &calls[0].command;
        assert!(secret_cmd.contains("--docker-server=10.0.0.7:5000"));
        assert!(secret_cmd.contains("--docker-username=user"));
        assert!(secret_cmd.contains("--docker-password=password"));

        let config_map: serde_json::Value =
            serde_json::from_str(calls[1].stdin.as_ref().unwrap()).unwrap();
        let embedded: serde_json::Value =
            serde_json::from_str(config_map["data"]["config.json"].as_str().unwrap()).unwrap();
        let auth = &embedded["auths"]["10.0.0.7:5000"];
        assert_eq!(auth["username"], "user");
        assert_eq!(auth["password"], "password");
    }

    #[test]
    fn htpasswd_hashes_the_fixed_username() {
        assert!(REGISTRY_HTPASSWD.starts_with("user:"));
    }
}
