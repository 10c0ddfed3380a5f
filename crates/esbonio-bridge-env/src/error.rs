//! Error types for environment management.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to run a child process to completion.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}ms", .timeout.as_millis())]
    Timeout { program: PathBuf, timeout: Duration },
}

/// Failure to resolve an interpreter.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The configured `server.pythonPath` cannot run the server.
    #[error("\"esbonio\" does not exist in the configured interpreter {}", .path.display())]
    ConfiguredInterpreterUnusable { path: PathBuf },
}

/// Failure to install the server into the managed environment.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("an installation is already running")]
    AlreadyRunning,

    #[error("no Python interpreter found to create the virtual environment")]
    NoBaseInterpreter,

    #[error("failed to remove {}: {source}", .path.display())]
    RemoveVenv {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} failed: {detail}")]
    StepFailed { step: &'static str, detail: String },

    #[error(transparent)]
    Run(#[from] RunError),
}

/// Failure to produce a launch plan.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("\"esbonio\" is not installed and was not installed")]
    ServerNotFound,

    #[error("failed to prepare storage directory {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ActivationError {
    /// Whether the user has to fix their configuration before retrying.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(self, ActivationError::Resolve(_))
    }
}
