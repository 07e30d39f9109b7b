//! External command execution
//!
//! Every cluster-facing operation in snow is a CLI invocation. This module
//! provides the [`CommandRunner`] trait all flows depend on (allowing
//! substitution with a scripted fake in tests) and the concrete
//! [`ShellRunner`] over `tokio::process::Command`.
//!
//! Stdout is captured and returned; stderr is never parsed, it only travels
//! inside the error when an invocation exits non-zero.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Captured output of a completed external command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output, lossily decoded
    pub stdout: String,
}

impl CommandOutput {
    /// Stdout with surrounding whitespace removed
    ///
    /// CLI values like IP addresses and project ids arrive with a trailing
    /// newline.
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Trait for executing external commands (allows mocking in tests)
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion and capture stdout
    ///
    /// A non-zero exit status is an [`Error::Command`] carrying the command
    /// line and captured stderr.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run a program with a string piped to its stdin
    ///
    /// Used to stream inline resource manifests to `kubectl create -f -`.
    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &str,
    ) -> Result<CommandOutput>;
}

/// Render a program and argument vector as a single command line for
/// logging and error messages
pub fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Real command runner that executes actual system commands
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

impl ShellRunner {
    fn into_result(command: String, output: std::process::Output) -> Result<CommandOutput> {
        if !output.status.success() {
            return Err(Error::command(
                command,
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        })
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let command = command_line(program, args);
        debug!(command = %command, "executing");

        let output = Command::new(program).args(args).output().await?;
        Self::into_result(command, output)
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &str,
    ) -> Result<CommandOutput> {
        let command = command_line(program, args);
        debug!(command = %command, "executing with piped stdin");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        Self::into_result(command, output)
    }
}

// =============================================================================
// Output predicates
// =============================================================================
// The CLIs are queried for state, but their output is never structurally
// parsed; these two substring checks are the entire read surface.

/// Whether a `gcloud auth list` listing carries an active account marker
pub fn is_authenticated(auth_listing: &str) -> bool {
    auth_listing.contains('*')
}

/// Whether a cluster listing mentions the given cluster name
pub fn cluster_exists(listing: &str, name: &str) -> bool {
    listing.contains(name)
}
