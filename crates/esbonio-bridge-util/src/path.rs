//! Path utilities.

use std::path::{Path, PathBuf};

/// Application directory name used under the platform config/data roots.
pub const APP_DIR: &str = "esbonio-bridge";

/// Get the esbonio-bridge configuration directory.
///
/// On Unix, prefers `~/.config/esbonio-bridge` when it exists, like most CLI
/// tools, and otherwise falls back to the platform config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(unix)]
    {
        if let Some(home) = dirs::home_dir() {
            let xdg_config = home.join(".config").join(APP_DIR);
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }
    }

    dirs::config_dir().map(|d| d.join(APP_DIR))
}

/// Get the default storage root.
///
/// Holds the sphinx build cache and the managed virtual environment.
pub fn storage_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join(APP_DIR))
}

/// Get the logs directory under a storage root.
pub fn logs_dir(storage_root: &Path) -> PathBuf {
    storage_root.join("logs")
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
