//! Certificate workspace for the TLS-secured package manager
//!
//! The cloud flow secures helm/tiller with mutual TLS: a private certificate
//! authority signs one server identity (tiller) and one client identity
//! (helm). All key material is produced by `openssl` invocations and lives as
//! PEM files under the helm home directory; the [`CertificateWorkspace`]
//! value holds the paths and is passed explicitly to every step that needs
//! TLS material.
//!
//! Extension configuration that `openssl` expects from a file is
//! materialized inside the workspace before the invocation that consumes it.

use std::path::{Path, PathBuf};

use crate::exec::CommandRunner;
use crate::Result;

/// RSA key size for the CA and both leaf identities
const RSA_BITS: &str = "2048";

/// CA certificate validity in days (20 years)
const CA_VALIDITY_DAYS: &str = "7300";

/// Leaf certificate validity in days
const LEAF_VALIDITY_DAYS: &str = "365";

/// Extension config for the self-signed CA certificate
const V3_CA_EXTENSIONS: &str = "[req]\n\
req_extensions=v3_ca\n\
distinguished_name=req_distinguished_name\n\
[req_distinguished_name]\n\
[ v3_ca ]\n\
basicConstraints=critical,CA:TRUE\n\
subjectKeyIdentifier=hash\n\
authorityKeyIdentifier=keyid:always,issuer:always\n";

/// SAN extension config applied when signing the server identity
const SERVER_SAN: &str = "[SAN]\n\
subjectAltName=IP:127.0.0.1\n";

/// PEM file paths for one principal
#[derive(Debug, Clone)]
pub struct IdentityPaths {
    /// Private key
    pub key: PathBuf,
    /// Certificate signing request
    pub csr: PathBuf,
    /// Certificate (self-signed for the CA, CA-signed for leaves)
    pub cert: PathBuf,
}

impl IdentityPaths {
    fn new(root: &Path, stem: &str) -> Self {
        Self {
            key: root.join(format!("{stem}.key.pem")),
            csr: root.join(format!("{stem}.csr.pem")),
            cert: root.join(format!("{stem}.cert.pem")),
        }
    }
}

/// Paths to the CA and the two leaf identities under the helm home directory
///
/// Created once per cloud bootstrap. Re-running the flow regenerates all
/// three identities in place; previously distributed certificates are
/// orphaned, not revoked.
#[derive(Debug, Clone)]
pub struct CertificateWorkspace {
    root: PathBuf,
    /// The private certificate authority
    pub ca: IdentityPaths,
    /// Server identity presented by tiller
    pub server: IdentityPaths,
    /// Client identity presented by helm and the operator
    pub client: IdentityPaths,
}

impl CertificateWorkspace {
    /// Create a workspace rooted at the given directory
    pub fn at(root: PathBuf) -> Self {
        Self {
            ca: IdentityPaths::new(&root, "ca"),
            server: IdentityPaths::new(&root, "tiller"),
            client: IdentityPaths::new(&root, "helm"),
            root,
        }
    }

    /// Resolve the workspace root from `helm home`
    pub async fn resolve(runner: &dyn CommandRunner) -> Result<Self> {
        let home = runner.run("helm", &["home"]).await?;
        Ok(Self::at(PathBuf::from(home.trimmed())))
    }

    /// Workspace root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Generate the CA and both signed identities
    ///
    /// Nine sequential `openssl` invocations; unconditional, with no check
    /// for existing material.
    pub async fn bootstrap(&self, runner: &dyn CommandRunner) -> Result<()> {
        self.generate_authority(runner).await?;
        self.issue_server_identity(runner).await?;
        self.issue_client_identity(runner).await?;
        Ok(())
    }

    async fn generate_authority(&self, runner: &dyn CommandRunner) -> Result<()> {
        let extensions = self.root.join("v3-ca.cnf");
        tokio::fs::write(&extensions, V3_CA_EXTENSIONS).await?;

        runner
            .run("openssl", &["genrsa", "-out", path(&self.ca.key), RSA_BITS])
            .await?;
        runner
            .run(
                "openssl",
                &[
                    "req",
                    "-config",
                    path(&extensions),
                    "-key",
                    path(&self.ca.key),
                    "-new",
                    "-x509",
                    "-days",
                    CA_VALIDITY_DAYS,
                    "-sha256",
                    "-out",
                    path(&self.ca.cert),
                    "-extensions",
                    "v3_ca",
                    "-subj",
                    "/C=US",
                ],
            )
            .await?;
        Ok(())
    }

    async fn issue_server_identity(&self, runner: &dyn CommandRunner) -> Result<()> {
        let san = self.root.join("tiller-san.cnf");
        tokio::fs::write(&san, SERVER_SAN).await?;

        runner
            .run(
                "openssl",
                &["genrsa", "-out", path(&self.server.key), RSA_BITS],
            )
            .await?;
        runner
            .run(
                "openssl",
                &[
                    "req",
                    "-new",
                    "-sha256",
                    "-key",
                    path(&self.server.key),
                    "-out",
                    path(&self.server.csr),
                    "-subj",
                    "/C=US/O=Snow/CN=tiller-server",
                ],
            )
            .await?;
        runner
            .run(
                "openssl",
                &[
                    "x509",
                    "-req",
                    "-days",
                    LEAF_VALIDITY_DAYS,
                    "-CA",
                    path(&self.ca.cert),
                    "-CAkey",
                    path(&self.ca.key),
                    "-CAcreateserial",
                    "-in",
                    path(&self.server.csr),
                    "-out",
                    path(&self.server.cert),
                    "-extfile",
                    path(&san),
                    "-extensions",
                    "SAN",
                ],
            )
            .await?;
        Ok(())
    }

    // The client identity is signed without an extensions file; the server
    // is the only identity carrying a SAN.
    async fn issue_client_identity(&self, runner: &dyn CommandRunner) -> Result<()> {
        runner
            .run(
                "openssl",
                &["genrsa", "-out", path(&self.client.key), RSA_BITS],
            )
            .await?;
        runner
            .run(
                "openssl",
                &[
                    "req",
                    "-new",
                    "-sha256",
                    "-key",
                    path(&self.client.key),
                    "-out",
                    path(&self.client.csr),
                    "-subj",
                    "/C=US",
                ],
            )
            .await?;
        runner
            .run(
                "openssl",
                &[
                    "x509",
                    "-req",
                    "-days",
                    LEAF_VALIDITY_DAYS,
                    "-CA",
                    path(&self.ca.cert),
                    "-CAkey",
                    path(&self.ca.key),
                    "-CAcreateserial",
                    "-in",
                    path(&self.client.csr),
                    "-out",
                    path(&self.client.cert),
                ],
            )
            .await?;
        Ok(())
    }

    /// The `--tls ...` argument block helm commands present the client
    /// identity with
    pub fn client_tls_args(&self) -> Vec<String> {
        vec![
            "--tls".to_string(),
            "--tls-ca-cert".to_string(),
            path(&self.ca.cert).to_string(),
            "--tls-cert".to_string(),
            path(&self.client.cert).to_string(),
            "--tls-key".to_string(),
            path(&self.client.key).to_string(),
        ]
    }
}

/// Path as &str; workspace paths originate from CLI output and are UTF-8
fn path(p: &Path) -> &str {
    p.to_str().unwrap_or_default()
}
