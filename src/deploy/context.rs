//! Build context preparation
//!
//! A deploy packages the project's Dockerfile plus the files enumerated in
//! `now.json` into a compressed archive, which is later shipped into the
//! builder pod. The archive contains exactly those paths and nothing else.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Local deployment metadata file read once per deploy
pub const MANIFEST_FILE: &str = "now.json";

/// Name of the build context archive written into the project directory
pub const ARCHIVE_NAME: &str = "buildcontext.tar.gz";

/// Local deployment metadata
///
/// `name` becomes the image repository; `files` are extra paths packaged
/// alongside the Dockerfile.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectManifest {
    /// Project name (required, non-empty)
    #[serde(default)]
    pub name: String,
    /// Extra paths to include in the build context
    #[serde(default)]
    pub files: Vec<String>,
}

impl ProjectManifest {
    /// Read and validate the manifest from the project directory
    ///
    /// Each failure mode aborts the deploy before any cluster interaction:
    /// an unreadable file, an unparseable file, and a missing or empty name
    /// all report distinct messages.
    pub async fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(MANIFEST_FILE);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::precondition(format!("error reading {MANIFEST_FILE}: {e}")))?;
        let manifest: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::precondition(format!("error parsing {MANIFEST_FILE}: {e}")))?;
        if manifest.name.is_empty() {
            return Err(Error::precondition(format!(
                "specify a \"name\" in {MANIFEST_FILE}"
            )));
        }
        Ok(manifest)
    }
}

/// Verify a Dockerfile exists at the project root
///
/// Reports the underlying filesystem error and performs no mutation.
pub async fn ensure_dockerfile(project_dir: &Path) -> Result<()> {
    tokio::fs::metadata(project_dir.join("Dockerfile"))
        .await
        .map_err(|e| Error::precondition(format!("error finding Dockerfile: {e}")))?;
    Ok(())
}

/// Package the Dockerfile and manifest-listed files into the build context
/// archive, returning its path
pub async fn write_archive(project_dir: &Path, manifest: &ProjectManifest) -> Result<PathBuf> {
    let dir = project_dir.to_path_buf();
    let files = manifest.files.clone();
    let archive_path = dir.join(ARCHIVE_NAME);
    let out = archive_path.clone();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::create(&out)?;
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        builder.append_path_with_name(dir.join("Dockerfile"), "Dockerfile")?;
        for relative in &files {
            let source = dir.join(relative);
            if source.is_dir() {
                builder.append_dir_all(relative, &source)?;
            } else {
                builder.append_path_with_name(&source, relative)?;
            }
        }

        let encoder = builder.into_inner()?;
        encoder.finish()?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::other(e)))??;

    Ok(archive_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with(manifest_body: &str, files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), manifest_body).unwrap();
        for (name, body) in files {
            std::fs::write(dir.path().join(name), body).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn manifest_loads_name_and_files() {
        let dir = project_with(r#"{"name": "app", "files": ["config.yaml"]}"#, &[]);
        let manifest = ProjectManifest::load(dir.path()).await.unwrap();
        assert_eq!(manifest.name, "app");
        assert_eq!(manifest.files, vec!["config.yaml"]);
    }

    #[tokio::test]
    async fn files_default_to_empty() {
        let dir = project_with(r#"{"name": "app"}"#, &[]);
        let manifest = ProjectManifest::load(dir.path()).await.unwrap();
        assert!(manifest.files.is_empty());
    }

    #[tokio::test]
    async fn missing_manifest_reports_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProjectManifest::load(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("error reading now.json"));
    }

    #[tokio::test]
    async fn unparseable_manifest_reports_a_parse_error() {
        let dir = project_with("not json at all", &[]);
        let err = ProjectManifest::load(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("error parsing now.json"));
    }

    #[tokio::test]
    async fn nameless_manifest_is_rejected() {
        for body in [r#"{}"#, r#"{"name": ""}"#, r#"{"files": ["a"]}"#] {
            let dir = project_with(body, &[]);
            let err = ProjectManifest::load(dir.path()).await.unwrap_err();
            assert!(err.to_string().contains("specify a \"name\""), "body: {body}");
        }
    }

    #[tokio::test]
    async fn missing_dockerfile_reports_the_underlying_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ensure_dockerfile(dir.path()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("error finding Dockerfile"));
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[tokio::test]
    async fn archive_contains_exactly_the_dockerfile_and_listed_files() {
        let dir = project_with(
            r#"{"name": "app", "files": ["config.yaml"]}"#,
            &[
                ("Dockerfile", "FROM scratch\n"),
                ("config.yaml", "key: value\n"),
                ("unlisted.txt", "left behind\n"),
            ],
        );
        let manifest = ProjectManifest::load(dir.path()).await.unwrap();

        let archive = write_archive(dir.path(), &manifest).await.unwrap();

        let file = std::fs::File::open(archive).unwrap();
        let decoder = flate2::read::GzDecoder::new(file);
        let mut entries: Vec<String> = tar::Archive::new(decoder)
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        entries.sort();

        assert_eq!(entries, vec!["Dockerfile", "config.yaml"]);
    }

    #[tokio::test]
    async fn archive_round_trips_file_contents() {
        let dir = project_with(
            r#"{"name": "app", "files": ["config.yaml"]}"#,
            &[("Dockerfile", "FROM scratch\n"), ("config.yaml", "key: value\n")],
        );
        let manifest = ProjectManifest::load(dir.path()).await.unwrap();
        let archive = write_archive(dir.path(), &manifest).await.unwrap();

        let file = std::fs::File::open(archive).unwrap();
        let decoder = flate2::read::GzDecoder::new(file);
        let mut found = false;
        for entry in tar::Archive::new(decoder).entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().to_str() == Some("config.yaml") {
                let mut body = String::new();
                std::io::Read::read_to_string(&mut entry, &mut body).unwrap();
                assert_eq!(body, "key: value\n");
                found = true;
            }
        }
        assert!(found);
    }

    #[tokio::test]
    async fn listed_file_missing_fails_the_archive() {
        let dir = project_with(
            r#"{"name": "app", "files": ["missing.yaml"]}"#,
            &[("Dockerfile", "FROM scratch\n")],
        );
        let manifest = ProjectManifest::load(dir.path()).await.unwrap();
        assert!(write_archive(dir.path(), &manifest).await.is_err());
    }
}
