//! Host platform conventions for virtual environments.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    /// Interpreter location inside a virtual environment.
    pub fn venv_interpreter(self, venv: &Path) -> PathBuf {
        match self {
            Platform::Unix => venv.join("bin").join("python"),
            Platform::Windows => venv.join("Scripts").join("python.exe"),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}
