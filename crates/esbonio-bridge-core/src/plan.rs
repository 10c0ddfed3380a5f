//! Launch planning.
//!
//! Turns a resolved interpreter and the settings into the command line and
//! `initializationOptions` the server is started with. Servers older than
//! the [`Capability::InitializationOptions`] gate, and servers whose version
//! could not be determined, are configured through command-line flags only.

use crate::config::Settings;
use crate::environment::ResolvedEnvironment;
use crate::gate::{Capability, CapabilitySet};
use serde::{Serialize, Serializer};
use std::path::PathBuf;

/// How to start the language server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchPlan {
    pub command: PathBuf,
    pub args: Vec<String>,
    /// Sent in the `initialize` request; `None` for legacy servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<InitializationOptions>,
}

impl LaunchPlan {
    /// The payload as JSON, or `None` when the server takes flags instead.
    pub fn initialization_options_value(&self) -> Option<serde_json::Value> {
        self.initialization_options
            .as_ref()
            .and_then(|options| serde_json::to_value(options).ok())
    }
}

/// Structured server configuration for the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitializationOptions {
    pub sphinx: SphinxOptions,
    pub server: ServerOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SphinxOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conf_dir: Option<String>,
    pub build_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_full_build: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_jobs: Option<NumJobs>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOptions {
    pub log_level: String,
    pub log_filter: Vec<String>,
    pub hide_sphinx_output: bool,
}

/// Parallel build setting as the server expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumJobs {
    /// Serialized as the string `"auto"`.
    Auto,
    Count(u32),
}

impl From<u32> for NumJobs {
    fn from(n: u32) -> Self {
        if n == 0 {
            NumJobs::Auto
        } else {
            NumJobs::Count(n)
        }
    }
}

impl Serialize for NumJobs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NumJobs::Auto => serializer.serialize_str("auto"),
            NumJobs::Count(n) => serializer.serialize_u32(*n),
        }
    }
}

/// Build the launch plan for `environment`.
///
/// Depends only on its arguments.
pub fn plan(environment: &ResolvedEnvironment, settings: &Settings) -> LaunchPlan {
    let capabilities = CapabilitySet::for_reported(environment.version_str());
    // Legacy servers take the same startup module as current ones.
    let mut args = startup_args(&settings.server.startup_module);

    let initialization_options = if capabilities.supports(Capability::InitializationOptions) {
        Some(structured_options(&capabilities, settings))
    } else {
        push_legacy_flags(&mut args, settings);
        None
    };

    if capabilities.supports(Capability::ModuleFilters) {
        for module in &settings.server.included_modules {
            args.push("--include".to_string());
            args.push(module.clone());
        }
        for module in &settings.server.excluded_modules {
            args.push("--exclude".to_string());
            args.push(module.clone());
        }
    }

    tracing::debug!(
        interpreter = %environment.executable_path.display(),
        version = environment.version_str().trim(),
        structured = initialization_options.is_some(),
        "Planned server launch"
    );

    LaunchPlan {
        command: environment.executable_path.clone(),
        args,
        initialization_options,
    }
}

/// `-m <module>`, or the script path itself for `.py` files and paths.
fn startup_args(startup_module: &str) -> Vec<String> {
    let is_script = startup_module.ends_with(".py")
        || startup_module.contains('/')
        || startup_module.contains('\\');

    if is_script {
        vec![startup_module.to_string()]
    } else {
        vec!["-m".to_string(), startup_module.to_string()]
    }
}

fn push_legacy_flags(args: &mut Vec<String>, settings: &Settings) {
    args.push("--cache-dir".to_string());
    args.push(settings.cache_dir().display().to_string());
    args.push("--log-level".to_string());
    args.push(settings.server.log_level.as_str().to_string());

    if settings.server.hide_sphinx_output {
        args.push("--hide-sphinx-output".to_string());
    }

    for filter in &settings.server.log_filter {
        args.push("--log-filter".to_string());
        args.push(filter.clone());
    }
}

fn structured_options(capabilities: &CapabilitySet, settings: &Settings) -> InitializationOptions {
    let tuning = capabilities.supports(Capability::BuildTuning);
    let build_dir = settings
        .sphinx
        .build_dir
        .clone()
        .unwrap_or_else(|| settings.cache_dir().display().to_string());

    InitializationOptions {
        sphinx: SphinxOptions {
            src_dir: settings.sphinx.src_dir.clone(),
            conf_dir: settings.sphinx.conf_dir.clone(),
            build_dir,
            force_full_build: tuning.then_some(settings.sphinx.force_full_build),
            num_jobs: tuning.then(|| NumJobs::from(settings.sphinx.num_jobs)),
        },
        server: ServerOptions {
            log_level: settings.server.log_level.as_str().to_string(),
            log_filter: settings.server.log_filter.clone(),
            hide_sphinx_output: settings.server.hide_sphinx_output,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerLogLevel, SettingsFile};
    use crate::environment::CandidateKind;
    use serde_json::json;

    fn settings() -> Settings {
        let mut settings =
            Settings::resolve_with_storage(SettingsFile::default(), PathBuf::from("/store"));
        settings.server.log_level = ServerLogLevel::Error;
        settings.server.hide_sphinx_output = true;
        settings.server.log_filter = vec!["sphinx.ext.autodoc".to_string()];
        settings
    }

    fn env(version: &str) -> ResolvedEnvironment {
        ResolvedEnvironment {
            executable_path: PathBuf::from("/usr/bin/python3"),
            version: Some(version.to_string()),
            kind: CandidateKind::SystemDiscovered,
        }
    }

    #[test]
    fn test_legacy_example() {
        let plan = plan(&env("0.5.0"), &settings());

        assert_eq!(plan.command, PathBuf::from("/usr/bin/python3"));
        assert_eq!(
            plan.args,
            vec![
                "-m",
                "esbonio",
                "--cache-dir",
                "/store/sphinx",
                "--log-level",
                "error",
                "--hide-sphinx-output",
                "--log-filter",
                "sphinx.ext.autodoc",
            ]
        );
        assert!(plan.initialization_options.is_none());
    }

    #[test]
    fn test_log_filters_keep_order() {
        let mut settings = settings();
        settings.server.hide_sphinx_output = false;
        settings.server.log_filter = vec!["b".to_string(), "a".to_string()];

        let plan = plan(&env("0.6.1"), &settings);
        assert_eq!(
            &plan.args[6..],
            &["--log-filter", "b", "--log-filter", "a"]
        );
    }

    #[test]
    fn test_unknown_versions_use_legacy_branch() {
        for version in ["", "garbage", "0.9", "Traceback"] {
            let plan = plan(&env(version), &settings());
            assert!(plan.initialization_options.is_none(), "version {version:?}");
            assert!(plan.args.contains(&"--cache-dir".to_string()));
        }

        let mut environment = env("");
        environment.version = None;
        assert!(plan(&environment, &settings()).initialization_options.is_none());
    }

    #[test]
    fn test_structured_example() {
        let plan = plan(&env("0.12.0"), &settings());

        assert_eq!(plan.args, vec!["-m", "esbonio"]);
        let value = plan.initialization_options_value().unwrap();
        assert_eq!(value["sphinx"]["numJobs"], json!("auto"));
        assert_eq!(value["sphinx"]["forceFullBuild"], json!(false));
        assert_eq!(value["sphinx"]["buildDir"], json!("/store/sphinx"));
        assert_eq!(value["server"]["logLevel"], json!("error"));
        assert_eq!(value["server"]["logFilter"], json!(["sphinx.ext.autodoc"]));
        assert_eq!(value["server"]["hideSphinxOutput"], json!(true));
    }

    #[test]
    fn test_structured_branch_has_no_legacy_flags() {
        for version in ["0.6.2", "0.9.0", "0.11.0", "0.16.5"] {
            let plan = plan(&env(version), &settings());
            assert!(plan.initialization_options.is_some());
            for flag in ["--cache-dir", "--log-level", "--hide-sphinx-output", "--log-filter"] {
                assert!(!plan.args.iter().any(|a| a == flag), "{flag} at {version}");
            }
        }
    }

    #[test]
    fn test_build_tuning_gate() {
        let plan = plan(&env("0.10.0"), &settings());
        let value = plan.initialization_options_value().unwrap();
        assert!(value["sphinx"].get("numJobs").is_none());
        assert!(value["sphinx"].get("forceFullBuild").is_none());
    }

    #[test]
    fn test_num_jobs_count() {
        let mut settings = settings();
        settings.sphinx.num_jobs = 4;
        settings.sphinx.force_full_build = true;

        let value = plan(&env("0.11.0"), &settings)
            .initialization_options_value()
            .unwrap();
        assert_eq!(value["sphinx"]["numJobs"], json!(4));
        assert_eq!(value["sphinx"]["forceFullBuild"], json!(true));
    }

    #[test]
    fn test_explicit_dirs() {
        let mut settings = settings();
        settings.sphinx.src_dir = Some("${workspaceRoot}/docs".to_string());
        settings.sphinx.conf_dir = Some("docs".to_string());
        settings.sphinx.build_dir = Some("/tmp/build".to_string());

        let value = plan(&env("0.11.0"), &settings)
            .initialization_options_value()
            .unwrap();
        assert_eq!(value["sphinx"]["srcDir"], json!("${workspaceRoot}/docs"));
        assert_eq!(value["sphinx"]["confDir"], json!("docs"));
        assert_eq!(value["sphinx"]["buildDir"], json!("/tmp/build"));
    }

    #[test]
    fn test_module_filters_gate() {
        let mut settings = settings();
        settings.server.included_modules = vec!["docs.api".to_string()];
        settings.server.excluded_modules = vec!["docs.legacy".to_string()];

        let old = plan(&env("0.8.0"), &settings);
        assert!(!old.args.iter().any(|a| a == "--include" || a == "--exclude"));

        let new = plan(&env("0.9.0"), &settings);
        assert_eq!(
            new.args,
            vec!["-m", "esbonio", "--include", "docs.api", "--exclude", "docs.legacy"]
        );
    }

    #[test]
    fn test_script_startup_module() {
        let mut settings = settings();
        settings.server.startup_module = "/opt/esbonio/run.py".to_string();
        let plan = plan(&env("0.12.0"), &settings);
        assert_eq!(plan.args, vec!["/opt/esbonio/run.py"]);

        settings.server.startup_module = "esbonio.lsp".to_string();
        let plan = super::plan(&env("0.12.0"), &settings);
        assert_eq!(plan.args, vec!["-m", "esbonio.lsp"]);
    }

    #[test]
    fn test_legacy_branch_uses_startup_module() {
        let mut settings = settings();
        settings.server.startup_module = "esbonio.lsp".to_string();
        let plan = plan(&env("0.5.0"), &settings);
        assert_eq!(&plan.args[..4], &["-m", "esbonio.lsp", "--cache-dir", "/store/sphinx"]);
        assert!(plan.initialization_options.is_none());
    }

    #[test]
    fn test_plan_is_deterministic() {
        let settings = settings();
        for version in ["0.5.0", "0.12.0", ""] {
            assert_eq!(plan(&env(version), &settings), plan(&env(version), &settings));
        }
    }
}
