//! Runtime candidates and the resolved interpreter environment.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Root of the managed virtual environment under a storage root.
pub fn managed_venv_dir(storage_root: &Path) -> PathBuf {
    storage_root.join(crate::SERVER_MODULE).join("venv")
}

/// Where a candidate interpreter came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateKind {
    /// `server.pythonPath` from the settings.
    UserConfigured,
    /// `python3` / `python` found on the search path.
    SystemDiscovered,
    /// The interpreter of the bridge-managed virtual environment.
    ManagedVenv,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateKind::UserConfigured => write!(f, "user-configured"),
            CandidateKind::SystemDiscovered => write!(f, "system"),
            CandidateKind::ManagedVenv => write!(f, "managed venv"),
        }
    }
}

/// An interpreter that might have the language server installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCandidate {
    pub kind: CandidateKind,
    pub path: PathBuf,
}

impl RuntimeCandidate {
    pub fn new(kind: CandidateKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// The interpreter chosen to run the language server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEnvironment {
    pub executable_path: PathBuf,
    /// Raw version reported by the server, `None` when the probe failed.
    pub version: Option<String>,
    pub kind: CandidateKind,
}

impl ResolvedEnvironment {
    pub fn new(candidate: RuntimeCandidate, version: Option<String>) -> Self {
        Self {
            executable_path: candidate.path,
            version,
            kind: candidate.kind,
        }
    }

    /// The reported version, or the empty string when unknown.
    pub fn version_str(&self) -> &str {
        self.version.as_deref().unwrap_or("")
    }
}
