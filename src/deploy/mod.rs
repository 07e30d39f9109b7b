//! Build pipeline driving the in-cluster builder pod
//!
//! A deploy packages the local build context, ships it into a privileged
//! builder pod, and drives the pod through four strictly ordered phases:
//! scheduled, context delivered, build triggered, completed. The pipeline
//! polls cluster state at fixed intervals; the only timeout in the system
//! guards the scheduling phase.
//!
//! The pipeline's responsibility ends once the image is pushed to the
//! private registry. Rolling the image out (Deployment/Service/Ingress) is
//! not part of this flow.

pub mod context;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::exec::CommandRunner;
use crate::{manifest, registry, Error, Result, BUILDER_INIT_CONTAINER, BUILDER_POD};

use self::context::ProjectManifest;

/// Deadline for the builder pod to be scheduled; the single point where the
/// workflow can time out rather than run indefinitely
pub const POD_SCHEDULED_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between scheduling-condition polls
const SCHEDULED_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Ceiling on the post-scheduling readiness grace; the pipeline proceeds
/// once the init container reports running, or when the ceiling lapses
const INIT_READY_CEILING: Duration = Duration::from_secs(10);

/// Interval between init-container readiness polls
const INIT_READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between completion polls (unbounded wait)
const COMPLETION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Phases of a builder pod build, in the only order they may occur
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildPhase {
    /// Pod created, not yet scheduled
    Pending,
    /// The scheduler placed the pod on a node
    Scheduled,
    /// The build context has been copied and unpacked into the shared volume
    ContextDelivered,
    /// The sentinel released the init container; the builder is running
    BuildTriggered,
    /// The pod reported success
    Completed,
}

impl BuildPhase {
    /// The only phase allowed to follow this one
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Scheduled),
            Self::Scheduled => Some(Self::ContextDelivered),
            Self::ContextDelivered => Some(Self::BuildTriggered),
            Self::BuildTriggered => Some(Self::Completed),
            Self::Completed => None,
        }
    }
}

/// The deploy flow: precondition checks, context packaging, and the builder
/// pod state machine
pub struct BuildPipeline<'a> {
    runner: &'a dyn CommandRunner,
    project_dir: PathBuf,
    cleanup: bool,
    phase: BuildPhase,
}

impl<'a> BuildPipeline<'a> {
    /// Create a pipeline for the project at the given directory
    pub fn new(runner: &'a dyn CommandRunner, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            project_dir: project_dir.into(),
            cleanup: false,
            phase: BuildPhase::Pending,
        }
    }

    /// Delete the builder pod after a successful build
    ///
    /// Off unless requested; a kept pod preserves build logs for inspection.
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Current phase of the build
    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    /// Run the pipeline to completion
    pub async fn run(&mut self) -> Result<()> {
        // Both preconditions fail before any cluster interaction
        context::ensure_dockerfile(&self.project_dir).await?;
        let project = ProjectManifest::load(&self.project_dir).await?;

        info!(name = %project.name, "packaging build context");
        let archive = context::write_archive(&self.project_dir, &project).await?;

        let registry_ip = registry::cluster_ip(self.runner).await?;
        let destination = format!(
            "{}/{}:latest",
            registry::endpoint(&registry_ip),
            project.name
        );

        println!("Building {destination} in-cluster...");
        self.create_builder_pod(&registry_ip, &project.name).await?;

        self.wait_for_scheduled().await?;
        self.advance(BuildPhase::Scheduled);

        self.wait_for_init_container().await?;
        self.copy_context(&archive).await?;
        self.unpack_context().await?;
        self.advance(BuildPhase::ContextDelivered);

        self.touch_sentinel().await?;
        self.advance(BuildPhase::BuildTriggered);

        self.wait_for_completion().await?;
        self.advance(BuildPhase::Completed);

        if self.cleanup {
            self.delete_builder_pod().await?;
        }

        println!("Build complete. Pushed {destination}.");
        Ok(())
    }

    // Transitions are strictly sequential; skipping or repeating a phase is
    // a pipeline bug.
    fn advance(&mut self, next: BuildPhase) {
        debug_assert_eq!(self.phase.next(), Some(next));
        debug!(phase = ?next, "builder phase reached");
        self.phase = next;
    }

    async fn create_builder_pod(&self, registry_ip: &str, name: &str) -> Result<()> {
        let pod = manifest::builder_pod(registry_ip, name);
        self.runner
            .run_with_stdin("kubectl", &["create", "-f", "-"], &manifest::render(&pod)?)
            .await?;
        Ok(())
    }

    /// Poll the PodScheduled condition until true, against the hard deadline
    ///
    /// A lapsed deadline is terminal for the deploy; nothing downstream runs.
    async fn wait_for_scheduled(&self) -> Result<()> {
        let start = Instant::now();
        loop {
            let output = self
                .runner
                .run(
                    "kubectl",
                    &[
                        "get",
                        "pod",
                        BUILDER_POD,
                        "-o",
                        r#"jsonpath={.status.conditions[?(@.type=="PodScheduled")].status}"#,
                    ],
                )
                .await?;
            if output.trimmed() == "True" {
                return Ok(());
            }
            if start.elapsed() >= POD_SCHEDULED_TIMEOUT {
                return Err(Error::Timeout(POD_SCHEDULED_TIMEOUT));
            }
            sleep(SCHEDULED_POLL_INTERVAL).await;
        }
    }

    /// Give the freshly scheduled pod time to start its init container,
    /// proceeding either on the running signal or when the ceiling lapses
    async fn wait_for_init_container(&self) -> Result<()> {
        let start = Instant::now();
        loop {
            let output = self
                .runner
                .run(
                    "kubectl",
                    &[
                        "get",
                        "pod",
                        BUILDER_POD,
                        "-o",
                        "jsonpath={.status.initContainerStatuses[0].state.running}",
                    ],
                )
                .await?;
            if !output.trimmed().is_empty() {
                return Ok(());
            }
            if start.elapsed() >= INIT_READY_CEILING {
                debug!("init container not observably running, proceeding anyway");
                return Ok(());
            }
            sleep(INIT_READY_POLL_INTERVAL).await;
        }
    }

    async fn copy_context(&self, archive: &Path) -> Result<()> {
        let local = archive.display().to_string();
        let remote = format!("{BUILDER_POD}:{}", manifest::CONTEXT_ARCHIVE_PATH);
        self.runner
            .run(
                "kubectl",
                &["cp", "-c", BUILDER_INIT_CONTAINER, &local, &remote],
            )
            .await?;
        Ok(())
    }

    async fn unpack_context(&self) -> Result<()> {
        self.runner
            .run(
                "kubectl",
                &[
                    "exec",
                    BUILDER_POD,
                    "-c",
                    BUILDER_INIT_CONTAINER,
                    "--",
                    "tar",
                    "-zxf",
                    manifest::CONTEXT_ARCHIVE_PATH,
                    "-C",
                    manifest::BUILD_CONTEXT_DIR,
                ],
            )
            .await?;
        Ok(())
    }

    /// Create the sentinel the init container busy-polls for, releasing the
    /// builder now that the context is in place
    async fn touch_sentinel(&self) -> Result<()> {
        self.runner
            .run(
                "kubectl",
                &[
                    "exec",
                    BUILDER_POD,
                    "-c",
                    BUILDER_INIT_CONTAINER,
                    "--",
                    "touch",
                    manifest::SENTINEL_PATH,
                ],
            )
            .await?;
        Ok(())
    }

    /// Poll, unbounded, until the pod reports success
    ///
    /// A terminal `Failed` phase is reported as a build failure instead of
    /// waiting forever on a pod that can no longer succeed.
    async fn wait_for_completion(&self) -> Result<()> {
        loop {
            let output = self
                .runner
                .run(
                    "kubectl",
                    &["get", "pod", BUILDER_POD, "-o", "jsonpath={.status.phase}"],
                )
                .await?;
            match output.trimmed() {
                "Succeeded" => return Ok(()),
                "Failed" => {
                    return Err(Error::command(
                        "kaniko build",
                        "builder pod reported phase Failed",
                    ))
                }
                _ => sleep(COMPLETION_POLL_INTERVAL).await,
            }
        }
    }

    async fn delete_builder_pod(&self) -> Result<()> {
        self.runner
            .run("kubectl", &["delete", &format!("pod/{BUILDER_POD}")])
            .await?;
        Ok(())
    }
}
