//! Error types for snow operations

use std::time::Duration;

use thiserror::Error;

/// Main error type for snow operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A local precondition is missing; raised before any external mutation
    #[error("precondition missing: {0}")]
    Precondition(String),

    /// An external CLI invocation returned a non-zero exit status
    #[error("command failed: {command}: {message}")]
    Command {
        /// The command line that failed
        command: String,
        /// Captured stderr of the failed invocation
        message: String,
    },

    /// The builder pod was not scheduled within the deadline
    #[error("timed out after {0:?} waiting for the builder pod to be scheduled")]
    Timeout(Duration),

    /// Local file I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest encoding error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a precondition error with the given message
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a command failure for the given command line
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}
