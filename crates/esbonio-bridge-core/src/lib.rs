//! Core types for esbonio-bridge.
//!
//! This crate holds everything that decides *how* the esbonio language server
//! is launched, without running any process itself:
//!
//! - [`config`]: layered settings files and the immutable [`Settings`] value
//! - [`version`]: parsing of the version string reported by the server
//! - [`gate`]: the ordered table of version-gated server capabilities
//! - [`plan`]: the launch planner producing a [`LaunchPlan`]
//! - [`notify`]: the seam for user-visible notifications

pub mod config;
pub mod environment;
pub mod error;
pub mod gate;
pub mod notify;
pub mod plan;
pub mod version;

pub use config::{ClientSettings, ServerLogLevel, ServerSettings, Settings, SettingsFile, SphinxSettings};
pub use environment::{managed_venv_dir, CandidateKind, ResolvedEnvironment, RuntimeCandidate};
pub use error::{ConfigError, ConfigResult};
pub use gate::{Capability, CapabilitySet};
pub use notify::{Notifier, NullNotifier};
pub use plan::{plan, InitializationOptions, LaunchPlan, NumJobs};
pub use version::Version;

/// Python module name of the language server.
pub const SERVER_MODULE: &str = "esbonio";

/// Package requirement installed into the managed environment.
pub const SERVER_PACKAGE: &str = "esbonio[lsp]";

/// Server version the bridge installs and is known to work with.
pub const SERVER_PINNED_VERSION: &str = "0.16.5";
