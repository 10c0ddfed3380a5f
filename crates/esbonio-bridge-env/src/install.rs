//! Installing the server into the managed virtual environment.
//!
//! An install always starts from scratch: the previous environment is
//! removed, a new one is created from a base interpreter, and pip installs
//! the pinned server release into it. Only one install runs at a time.

use crate::error::InstallError;
use crate::platform::Platform;
use crate::runner::ProcessRunner;
use crate::INSTALL_STEP_TIMEOUT;
use esbonio_bridge_core::{managed_venv_dir, Notifier, SERVER_PACKAGE, SERVER_PINNED_VERSION};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Running,
    Succeeded,
    Failed,
}

/// One installation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallJob {
    pub venv_dir: PathBuf,
    pub pinned_version: String,
    pub status: InstallStatus,
}

/// Creates and populates the managed environment.
pub struct InstallManager {
    runner: Arc<dyn ProcessRunner>,
    platform: Platform,
    timeout: Duration,
    in_progress: AtomicBool,
    last_job: Mutex<Option<InstallJob>>,
}

/// Clears the in-progress flag when the install finishes or is cancelled.
struct InstallGuard<'a>(&'a AtomicBool);

impl<'a> InstallGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, InstallError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| InstallError::AlreadyRunning)
    }
}

impl Drop for InstallGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl InstallManager {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            platform: Platform::current(),
            timeout: INSTALL_STEP_TIMEOUT,
            in_progress: AtomicBool::new(false),
            last_job: Mutex::new(None),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// The most recent job, if any install was attempted.
    pub fn last_job(&self) -> Option<InstallJob> {
        self.last_job.lock().ok().and_then(|job| job.clone())
    }

    /// The `package==version` requirement passed to pip.
    pub fn requirement() -> String {
        format!("{SERVER_PACKAGE}=={SERVER_PINNED_VERSION}")
    }

    /// Rebuild the managed environment using `base_interpreter`.
    ///
    /// Progress and the final outcome are reported through `notifier`.
    pub async fn install(
        &self,
        base_interpreter: &Path,
        storage_root: &Path,
        notifier: &dyn Notifier,
    ) -> Result<InstallJob, InstallError> {
        let _guard = InstallGuard::acquire(&self.in_progress)?;

        let mut job = InstallJob {
            venv_dir: managed_venv_dir(storage_root),
            pinned_version: SERVER_PINNED_VERSION.to_string(),
            status: InstallStatus::Running,
        };
        self.record(&job);

        let requirement = Self::requirement();
        tracing::info!(
            base = %base_interpreter.display(),
            venv = %job.venv_dir.display(),
            %requirement,
            "Installing language server"
        );
        match self.run_steps(base_interpreter, &job.venv_dir, &requirement, notifier).await {
            Ok(()) => {
                job.status = InstallStatus::Succeeded;
                self.record(&job);
                notifier.info(&format!("{SERVER_PACKAGE}: installed!")).await;
                Ok(job)
            }
            Err(e) => {
                job.status = InstallStatus::Failed;
                self.record(&job);
                tracing::error!(error = %e, "Install failed");
                notifier
                    .error(&format!("{SERVER_PACKAGE}: install failed. | {e}"))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        base_interpreter: &Path,
        venv_dir: &Path,
        requirement: &str,
        notifier: &dyn Notifier,
    ) -> Result<(), InstallError> {
        match tokio::fs::remove_dir_all(venv_dir).await {
            Ok(()) => tracing::debug!(venv = %venv_dir.display(), "Removed previous environment"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(InstallError::RemoveVenv {
                    path: venv_dir.to_path_buf(),
                    source,
                })
            }
        }

        notifier.progress("Creating virtual environment...").await;
        self.step(
            "create virtual environment",
            base_interpreter,
            vec![
                "-m".to_string(),
                "venv".to_string(),
                venv_dir.display().to_string(),
            ],
        )
        .await?;

        notifier.progress(&format!("Installing {requirement}...")).await;
        let venv_python = self.platform.venv_interpreter(venv_dir);
        self.step(
            "pip install",
            &venv_python,
            vec![
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
                "-U".to_string(),
                "pip".to_string(),
                requirement.to_string(),
            ],
        )
        .await
    }

    async fn step(
        &self,
        step: &'static str,
        program: &Path,
        args: Vec<String>,
    ) -> Result<(), InstallError> {
        let output = self.runner.run(program, &args, self.timeout).await?;
        if output.success() {
            return Ok(());
        }

        let detail = output
            .stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string())
            .unwrap_or_else(|| match output.exit_code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            });
        Err(InstallError::StepFailed { step, detail })
    }

    fn record(&self, job: &InstallJob) {
        if let Ok(mut last) = self.last_job.lock() {
            *last = Some(job.clone());
        }
    }
}
