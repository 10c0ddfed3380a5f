//! Interpreter resolution.
//!
//! Candidates are tried in priority order and the first one that can run
//! the server wins:
//!
//! 1. `server.pythonPath`, when set. If it cannot run the server,
//!    resolution fails outright and nothing else is tried.
//! 2. `python3`, then `python`, on the search path.
//! 3. The managed virtual environment under the storage root.

use crate::error::ResolveError;
use crate::platform::Platform;
use crate::probe::ServerProbe;
use esbonio_bridge_core::{managed_venv_dir, CandidateKind, ResolvedEnvironment, RuntimeCandidate};
use std::path::{Path, PathBuf};

/// Interpreter names looked up on the search path, in order.
const SYSTEM_INTERPRETERS: &[&str] = &["python3", "python"];

/// How the system interpreter is found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SystemDiscovery {
    /// Look up [`SYSTEM_INTERPRETERS`] on `PATH`.
    #[default]
    SearchPath,
    /// Use a fixed answer.
    Fixed(Option<PathBuf>),
}

impl SystemDiscovery {
    /// Find the system interpreter, optionally resolving symlinks.
    ///
    /// A name whose path cannot be canonicalized is skipped.
    pub fn find(&self, canonical: bool) -> Option<PathBuf> {
        match self {
            SystemDiscovery::Fixed(path) => path.clone(),
            SystemDiscovery::SearchPath => SYSTEM_INTERPRETERS.iter().find_map(|name| {
                let path = which::which(name).ok()?;
                if canonical {
                    path.canonicalize().ok()
                } else {
                    Some(path)
                }
            }),
        }
    }
}

/// Chooses the interpreter that runs the language server.
#[derive(Clone)]
pub struct EnvironmentResolver {
    probe: ServerProbe,
    platform: Platform,
    system: SystemDiscovery,
}

impl EnvironmentResolver {
    pub fn new(probe: ServerProbe) -> Self {
        Self {
            probe,
            platform: Platform::current(),
            system: SystemDiscovery::SearchPath,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_system_discovery(mut self, system: SystemDiscovery) -> Self {
        self.system = system;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn system(&self) -> &SystemDiscovery {
        &self.system
    }

    /// Interpreter of the managed environment under `storage_root`.
    pub fn managed_interpreter(&self, storage_root: &Path) -> PathBuf {
        self.platform
            .venv_interpreter(&managed_venv_dir(storage_root))
    }

    /// Fallback candidates used when no interpreter is configured.
    pub fn candidates(&self, storage_root: &Path) -> Vec<RuntimeCandidate> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(path) = self.system.find(false) {
            candidates.push(RuntimeCandidate::new(CandidateKind::SystemDiscovered, path));
        }
        candidates.push(RuntimeCandidate::new(
            CandidateKind::ManagedVenv,
            self.managed_interpreter(storage_root),
        ));
        candidates
    }

    /// Resolve an interpreter, probing its version on success.
    ///
    /// `Ok(None)` means no candidate has the server installed.
    pub async fn resolve(
        &self,
        configured: Option<&Path>,
        storage_root: &Path,
    ) -> Result<Option<ResolvedEnvironment>, ResolveError> {
        if let Some(path) = configured {
            let candidate = RuntimeCandidate::new(CandidateKind::UserConfigured, path);
            if !self.probe.has_server(path).await {
                tracing::error!(path = %path.display(), "Configured interpreter cannot run the server");
                return Err(ResolveError::ConfiguredInterpreterUnusable {
                    path: path.to_path_buf(),
                });
            }
            return Ok(Some(self.finish(candidate).await));
        }

        for candidate in self.candidates(storage_root) {
            if let Some(environment) = self.try_candidate(candidate).await {
                return Ok(Some(environment));
            }
        }

        tracing::info!("No interpreter with the server installed");
        Ok(None)
    }

    /// Re-check only the managed environment, e.g. after an install.
    pub async fn resolve_managed(&self, storage_root: &Path) -> Option<ResolvedEnvironment> {
        let candidate = RuntimeCandidate::new(
            CandidateKind::ManagedVenv,
            self.managed_interpreter(storage_root),
        );
        self.try_candidate(candidate).await
    }

    async fn try_candidate(&self, candidate: RuntimeCandidate) -> Option<ResolvedEnvironment> {
        if candidate.kind == CandidateKind::ManagedVenv && !candidate.path.exists() {
            tracing::debug!(path = %candidate.path.display(), "Managed environment not present");
            return None;
        }

        if self.probe.has_server(&candidate.path).await {
            Some(self.finish(candidate).await)
        } else {
            tracing::debug!(kind = %candidate.kind, path = %candidate.path.display(), "Candidate rejected");
            None
        }
    }

    async fn finish(&self, candidate: RuntimeCandidate) -> ResolvedEnvironment {
        let version = self.probe.get_version(&candidate.path).await;
        tracing::info!(
            kind = %candidate.kind,
            path = %candidate.path.display(),
            version = %version,
            "Resolved interpreter"
        );
        ResolvedEnvironment::new(candidate, (!version.is_empty()).then_some(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_discovery() {
        let system = SystemDiscovery::Fixed(Some(PathBuf::from("/usr/bin/python3")));
        assert_eq!(system.find(true), Some(PathBuf::from("/usr/bin/python3")));
        assert_eq!(SystemDiscovery::Fixed(None).find(false), None);
    }
}
