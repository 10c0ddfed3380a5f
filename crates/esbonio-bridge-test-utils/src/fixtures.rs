//! Test fixtures for creating reproducible test environments.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary project directory, removed when dropped.
///
/// # Example
///
/// ```rust
/// use esbonio_bridge_test_utils::fixtures::TestProject;
///
/// let project = TestProject::new()
///     .with_file("docs/conf.py", "project = 'demo'\n")
///     .build();
///
/// assert!(project.path().join("docs/conf.py").exists());
/// ```
pub struct TestProject {
    temp_dir: TempDir,
    files: Vec<(PathBuf, String)>,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
            files: Vec::new(),
        }
    }

    /// Add a file relative to the project root. Parents are created.
    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.files
            .push((path.as_ref().to_path_buf(), contents.into()));
        self
    }

    /// Add a project settings file.
    pub fn with_settings(self, jsonc: &str) -> Self {
        self.with_file("esbonio-bridge.jsonc", jsonc)
    }

    /// Write all files and return the directory.
    pub fn build(self) -> TempDir {
        for (path, contents) in &self.files {
            let full = self.temp_dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).expect("Failed to create parent directory");
            }
            fs::write(&full, contents).expect("Failed to write fixture file");
        }
        self.temp_dir
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Create an empty file (and its parents), e.g. a fake interpreter.
pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(path, "").expect("Failed to create file");
}
