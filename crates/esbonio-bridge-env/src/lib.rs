//! Interpreter environment management for esbonio-bridge.
//!
//! This crate finds a Python interpreter that can run the esbonio language
//! server, asks it for the server version, and installs the server into a
//! managed virtual environment when nothing usable exists.

pub mod activation;
pub mod error;
pub mod install;
pub mod platform;
pub mod probe;
pub mod resolver;
pub mod runner;

pub use activation::{Activated, Activation};
pub use error::{ActivationError, InstallError, ResolveError, RunError};
pub use install::{InstallJob, InstallManager, InstallStatus};
pub use platform::Platform;
pub use probe::ServerProbe;
pub use resolver::{EnvironmentResolver, SystemDiscovery};
pub use runner::{ProcessOutput, ProcessRunner, TokioRunner};

use std::time::Duration;

/// Upper bound for a single probe of an interpreter.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for one installation step.
pub const INSTALL_STEP_TIMEOUT: Duration = Duration::from_secs(600);
