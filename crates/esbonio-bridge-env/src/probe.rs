//! Asking an interpreter about the language server.

use crate::runner::ProcessRunner;
use crate::PROBE_TIMEOUT;
use esbonio_bridge_core::SERVER_MODULE;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Runs `python -m esbonio ...` probes through a [`ProcessRunner`].
#[derive(Clone)]
pub struct ServerProbe {
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
}

impl ServerProbe {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            timeout: PROBE_TIMEOUT,
        }
    }

    /// True iff `<interpreter> -m esbonio -h` exits successfully.
    pub async fn has_server(&self, interpreter: &Path) -> bool {
        let args = probe_args("-h");
        match self.runner.run(interpreter, &args, self.timeout).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                tracing::debug!(
                    interpreter = %interpreter.display(),
                    exit_code = ?output.exit_code,
                    "Server module not available"
                );
                false
            }
            Err(e) => {
                tracing::debug!(interpreter = %interpreter.display(), error = %e, "Probe failed");
                false
            }
        }
    }

    /// Output of `<interpreter> -m esbonio --version`, or `""` on any failure.
    pub async fn get_version(&self, interpreter: &Path) -> String {
        let args = probe_args("--version");
        match self.runner.run(interpreter, &args, self.timeout).await {
            Ok(output) if output.success() => output.stdout.trim().to_string(),
            Ok(_) => String::new(),
            Err(e) => {
                tracing::debug!(interpreter = %interpreter.display(), error = %e, "Version probe failed");
                String::new()
            }
        }
    }
}

fn probe_args(flag: &str) -> Vec<String> {
    vec!["-m".to_string(), SERVER_MODULE.to_string(), flag.to_string()]
}
