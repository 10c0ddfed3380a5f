//! Configuration management for esbonio-bridge.
//!
//! Settings are loaded from multiple sources and merged, later sources
//! overriding earlier ones field by field:
//! 1. Global config: `~/.config/esbonio-bridge/config.json`
//! 2. Environment variable: `ESBONIO_BRIDGE_CONFIG_CONTENT`
//! 3. Project config: `esbonio-bridge.jsonc` or `esbonio-bridge.json`
//! 4. The editor's `initializationOptions.esbonio` (serve mode)
//! 5. Command-line flags
//!
//! Files support JSONC (JSON with comments) and variable substitution:
//! - `{env:VAR_NAME}` - Substitute environment variable
//! - `{file:path}` - Substitute file contents
//!
//! The merged [`SettingsFile`] is resolved once into an immutable
//! [`Settings`] value that is passed explicitly to everything downstream.

use crate::error::{ConfigError, ConfigResult};
use esbonio_bridge_util::path;
use json_comments::CommentSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Static regex for variable substitution, compiled once.
static VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

fn var_regex() -> &'static regex::Regex {
    VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\{(env|file):([^}]+)\}")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Project config file names, in lookup order.
const PROJECT_FILES: &[&str] = &["esbonio-bridge.jsonc", "esbonio-bridge.json"];

/// Global config file names, in lookup order.
const GLOBAL_FILES: &[&str] = &["config.json", "esbonio-bridge.json", "esbonio-bridge.jsonc"];

/// One layer of settings as written in a config file.
///
/// Every field is optional so layers can be merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsFile {
    /// JSON Schema reference.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Master switch for the whole bridge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,

    /// Root for the build cache and the managed environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sphinx: Option<SphinxSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientSection>,
}

/// `server.*` settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSection {
    /// Whether to launch the language server at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Also attach to Python files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled_in_py_files: Option<bool>,

    /// Interpreter that must have the server installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_path: Option<String>,

    /// Module name or script path used to start the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_module: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<ServerLogLevel>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hide_sphinx_output: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub included_modules: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_modules: Option<Vec<String>>,
}

impl ServerSection {
    /// Merge another section into this one (other takes precedence).
    pub fn merge(self, other: Self) -> Self {
        Self {
            enabled: other.enabled.or(self.enabled),
            enabled_in_py_files: other.enabled_in_py_files.or(self.enabled_in_py_files),
            python_path: other.python_path.or(self.python_path),
            startup_module: other.startup_module.or(self.startup_module),
            log_level: other.log_level.or(self.log_level),
            log_filter: other.log_filter.or(self.log_filter),
            hide_sphinx_output: other.hide_sphinx_output.or(self.hide_sphinx_output),
            included_modules: other.included_modules.or(self.included_modules),
            excluded_modules: other.excluded_modules.or(self.excluded_modules),
        }
    }
}

/// `sphinx.*` settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SphinxSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conf_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_full_build: Option<bool>,

    /// Parallel build jobs, `0` meaning automatic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_jobs: Option<u32>,
}

impl SphinxSection {
    /// Merge another section into this one (other takes precedence).
    pub fn merge(self, other: Self) -> Self {
        Self {
            src_dir: other.src_dir.or(self.src_dir),
            conf_dir: other.conf_dir.or(self.conf_dir),
            build_dir: other.build_dir.or(self.build_dir),
            force_full_build: other.force_full_build.or(self.force_full_build),
            num_jobs: other.num_jobs.or(self.num_jobs),
        }
    }
}

/// `client.*` settings, applied by the bridge itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_directive_completion: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_character_level1: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_character_level2: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_character_level3: Option<String>,
}

impl ClientSection {
    /// Merge another section into this one (other takes precedence).
    pub fn merge(self, other: Self) -> Self {
        Self {
            fix_directive_completion: other
                .fix_directive_completion
                .or(self.fix_directive_completion),
            section_character_level1: other
                .section_character_level1
                .or(self.section_character_level1),
            section_character_level2: other
                .section_character_level2
                .or(self.section_character_level2),
            section_character_level3: other
                .section_character_level3
                .or(self.section_character_level3),
        }
    }
}

/// Log level understood by the language server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerLogLevel {
    #[default]
    Error,
    Info,
    Debug,
}

impl ServerLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerLogLevel::Error => "error",
            ServerLogLevel::Info => "info",
            ServerLogLevel::Debug => "debug",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(ServerLogLevel::Error),
            "info" => Some(ServerLogLevel::Info),
            "debug" => Some(ServerLogLevel::Debug),
            _ => None,
        }
    }
}

impl SettingsFile {
    /// Load settings from the global config, the environment and `project_dir`.
    ///
    /// Returns the merged layer and the files it was read from.
    pub async fn load(project_dir: Option<&Path>) -> ConfigResult<(Self, Vec<PathBuf>)> {
        let mut settings = SettingsFile::default();
        let mut sources = Vec::new();

        if let Some(global_dir) = path::config_dir() {
            for name in GLOBAL_FILES {
                let path = global_dir.join(name);
                if path.exists() {
                    let loaded = Self::load_file(&path).await?;
                    settings = settings.merge(loaded);
                    sources.push(path);
                    break;
                }
            }
        }

        if let Ok(content) = std::env::var("ESBONIO_BRIDGE_CONFIG_CONTENT") {
            let loaded = Self::parse_jsonc(&content, "<env>")?;
            settings = settings.merge(loaded);
        }

        if let Some(dir) = project_dir {
            for name in PROJECT_FILES {
                let path = dir.join(name);
                if path.exists() {
                    let loaded = Self::load_file(&path).await?;
                    settings = settings.merge(loaded);
                    sources.push(path);
                    break;
                }
            }
        }

        tracing::debug!(sources = ?sources, "Loaded settings");
        Ok((settings, sources))
    }

    /// Load one settings file.
    pub async fn load_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::substitute_variables(&content, path)?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Read a layer from the editor's `initializationOptions`.
    ///
    /// Accepts either `{"esbonio": {...}}` or the settings object itself.
    pub fn from_initialization_options(value: &serde_json::Value) -> ConfigResult<Self> {
        let value = value.get("esbonio").unwrap_or(value);
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidJson {
            path: "<initializationOptions>".to_string(),
            message: e.to_string(),
        })
    }

    /// Parse JSONC (JSON with `//` and `/* */` comments).
    ///
    /// Comments are blanked out in place, so error positions still point
    /// into the original text.
    pub fn parse_jsonc(content: &str, source: &str) -> ConfigResult<Self> {
        let reader = CommentSettings::c_style().strip_comments(content.as_bytes());

        serde_json::from_reader(reader).map_err(|e| ConfigError::InvalidJson {
            path: source.to_string(),
            message: e.to_string(),
        })
    }

    /// Substitute `{env:..}` and `{file:..}` references.
    ///
    /// File references are relative to the config file.
    fn substitute_variables(content: &str, config_path: &Path) -> ConfigResult<String> {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        let mut result = content.to_string();

        for cap in var_regex().captures_iter(content) {
            let (Some(full_match), Some(kind), Some(value)) = (cap.get(0), cap.get(1), cap.get(2))
            else {
                continue;
            };
            let value = value.as_str();

            let replacement = match kind.as_str() {
                "env" => std::env::var(value).map_err(|_| ConfigError::EnvVarNotFound {
                    name: value.to_string(),
                })?,
                "file" => {
                    let file_path = config_dir.join(value);
                    std::fs::read_to_string(&file_path)
                        .map(|v| v.trim().to_string())
                        .map_err(|_| ConfigError::FileRefNotFound {
                            path: file_path.display().to_string(),
                        })?
                }
                _ => continue,
            };

            result = result.replace(full_match.as_str(), &replacement);
        }

        Ok(result)
    }

    /// Merge another layer into this one (other takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        if other.schema.is_some() {
            self.schema = other.schema;
        }
        if other.enable.is_some() {
            self.enable = other.enable;
        }
        if other.storage_dir.is_some() {
            self.storage_dir = other.storage_dir;
        }

        self.server = merge_section(self.server, other.server, ServerSection::merge);
        self.sphinx = merge_section(self.sphinx, other.sphinx, SphinxSection::merge);
        self.client = merge_section(self.client, other.client, ClientSection::merge);

        self
    }
}

/// Merge two optional nested sections field by field.
fn merge_section<T>(base: Option<T>, other: Option<T>, merge: fn(T, T) -> T) -> Option<T> {
    match (base, other) {
        (Some(base), Some(other)) => Some(merge(base, other)),
        (base, None) => base,
        (None, other) => other,
    }
}

/// Resolved server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub enabled: bool,
    pub enabled_in_py_files: bool,
    /// Explicit interpreter; `None` when unset or empty.
    pub python_path: Option<PathBuf>,
    pub startup_module: String,
    pub log_level: ServerLogLevel,
    pub log_filter: Vec<String>,
    pub hide_sphinx_output: bool,
    pub included_modules: Vec<String>,
    pub excluded_modules: Vec<String>,
}

/// Resolved sphinx settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SphinxSettings {
    pub src_dir: Option<String>,
    pub conf_dir: Option<String>,
    pub build_dir: Option<String>,
    pub force_full_build: bool,
    pub num_jobs: u32,
}

/// Resolved client-side settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub fix_directive_completion: bool,
    /// Underline characters for section levels 1 to 3.
    pub section_characters: [String; 3],
}

/// Immutable settings for one activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub enable: bool,
    pub storage_root: PathBuf,
    pub server: ServerSettings,
    pub sphinx: SphinxSettings,
    pub client: ClientSettings,
}

/// Default underline characters for section levels 1 to 3.
pub const DEFAULT_SECTION_CHARACTERS: [&str; 3] = ["=", "-", "~"];

impl Settings {
    /// Resolve a merged layer, filling in defaults.
    ///
    /// Fails only when no storage directory is configured and none can be
    /// derived from the platform.
    pub fn resolve(file: SettingsFile) -> ConfigResult<Self> {
        let storage_root = match file.storage_dir.as_deref().filter(|s| !s.is_empty()) {
            Some(dir) => path::expand_home(dir),
            None => path::storage_dir().ok_or_else(|| {
                ConfigError::InvalidPath("Could not determine storage directory".to_string())
            })?,
        };
        Ok(Self::resolve_with_storage(file, storage_root))
    }

    /// Resolve a merged layer against an explicit storage root.
    pub fn resolve_with_storage(file: SettingsFile, storage_root: PathBuf) -> Self {
        let server = file.server.unwrap_or_default();
        let sphinx = file.sphinx.unwrap_or_default();
        let client = file.client.unwrap_or_default();

        let section_character = |value: Option<String>, level: usize| {
            value
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_SECTION_CHARACTERS[level].to_string())
        };

        Self {
            enable: file.enable.unwrap_or(true),
            storage_root,
            server: ServerSettings {
                enabled: server.enabled.unwrap_or(true),
                enabled_in_py_files: server.enabled_in_py_files.unwrap_or(false),
                python_path: server
                    .python_path
                    .filter(|p| !p.trim().is_empty())
                    .map(|p| path::expand_home(p.trim())),
                startup_module: server
                    .startup_module
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| crate::SERVER_MODULE.to_string()),
                log_level: server.log_level.unwrap_or_default(),
                log_filter: server.log_filter.unwrap_or_default(),
                hide_sphinx_output: server.hide_sphinx_output.unwrap_or(false),
                included_modules: server.included_modules.unwrap_or_default(),
                excluded_modules: server.excluded_modules.unwrap_or_default(),
            },
            sphinx: SphinxSettings {
                src_dir: sphinx.src_dir.filter(|s| !s.is_empty()),
                conf_dir: sphinx.conf_dir.filter(|s| !s.is_empty()),
                build_dir: sphinx.build_dir.filter(|s| !s.is_empty()),
                force_full_build: sphinx.force_full_build.unwrap_or(false),
                num_jobs: sphinx.num_jobs.unwrap_or(0),
            },
            client: ClientSettings {
                fix_directive_completion: client.fix_directive_completion.unwrap_or(true),
                section_characters: [
                    section_character(client.section_character_level1, 0),
                    section_character(client.section_character_level2, 1),
                    section_character(client.section_character_level3, 2),
                ],
            },
        }
    }

    /// Default sphinx build cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.storage_root.join("sphinx")
    }

    /// Root of the managed virtual environment.
    pub fn venv_dir(&self) -> PathBuf {
        crate::environment::managed_venv_dir(&self.storage_root)
    }
}
