//! esbonio-bridge - launch and relay the esbonio language server.
//!
//! This is the main entry point for the esbonio-bridge CLI.

mod console;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::ConsoleNotifier;
use esbonio_bridge_core::config::ServerSection;
use esbonio_bridge_core::{plan, Notifier, ResolvedEnvironment, ServerLogLevel, Settings, SettingsFile};
use esbonio_bridge_env::{Activation, TokioRunner};
use esbonio_bridge_lsp::{Bridge, ProcessLauncher, SettingsLayers};
use esbonio_bridge_util::{path, LogConfig, LogLevel, LogTarget};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "esbonio-bridge")]
#[command(author, version, about = "Launch and relay the esbonio language server", long_about = None)]
struct Cli {
    /// Python interpreter that has esbonio installed
    #[arg(long, global = true)]
    python: Option<PathBuf>,

    /// Root for the build cache and the managed environment
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Language server log level (error, info, debug)
    #[arg(long, global = true, value_parser = parse_server_log_level)]
    log_level: Option<ServerLogLevel>,

    /// Enable verbose logging of the bridge itself
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log to stderr instead of a file when serving
    #[arg(long, global = true)]
    log_stderr: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run the bridge on stdin/stdout (default)
    Serve,
    /// Install or upgrade esbonio in the managed environment
    Install {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Resolve the interpreter and print the launch plan
    Plan {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print version information
    Version,
}

fn parse_server_log_level(s: &str) -> Result<ServerLogLevel, String> {
    ServerLogLevel::parse(s).ok_or_else(|| format!("unknown log level '{s}', expected error, info or debug"))
}

impl Cli {
    /// The settings layer given on the command line.
    fn overrides(&self) -> SettingsFile {
        let server = (self.python.is_some() || self.log_level.is_some()).then(|| ServerSection {
            python_path: self.python.as_ref().map(|p| p.display().to_string()),
            log_level: self.log_level,
            ..Default::default()
        });

        SettingsFile {
            storage_dir: self.storage_dir.as_ref().map(|p| p.display().to_string()),
            server,
            ..Default::default()
        }
    }

    fn log_config(&self, settings: &Settings) -> LogConfig {
        let level = if self.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        };
        let serving = matches!(self.command, None | Some(Commands::Serve));
        let target = if serving && !self.log_stderr {
            LogTarget::File(path::logs_dir(&settings.storage_root).join("esbonio-bridge.log"))
        } else {
            LogTarget::Stderr
        };

        LogConfig {
            level,
            target,
            include_location: self.verbose,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.command == Some(Commands::Version) {
        print_version();
        return Ok(());
    }

    let cwd = std::env::current_dir()?;
    let (files, sources) = SettingsFile::load(Some(&cwd))
        .await
        .context("Failed to load settings")?;
    let layers = SettingsLayers {
        files,
        overrides: cli.overrides(),
    };
    let settings = layers.resolve(None).context("Invalid settings")?;

    let log_file = esbonio_bridge_util::log::init(cli.log_config(&settings));
    info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?log_file,
        sources = ?sources,
        storage = %settings.storage_root.display(),
        "Starting esbonio-bridge"
    );

    if !settings.enable {
        info!("esbonio-bridge is disabled by settings");
        return Ok(());
    }

    match cli.command {
        None | Some(Commands::Serve) => serve(layers, &cwd).await,
        Some(Commands::Install { yes }) => install(&settings, yes).await,
        Some(Commands::Plan { json }) => show_plan(&settings, json).await,
        Some(Commands::Version) => Ok(()),
    }
}

async fn serve(layers: SettingsLayers, cwd: &Path) -> anyhow::Result<()> {
    let activation = Activation::new(Arc::new(TokioRunner));
    let bridge = Bridge::new(activation, layers)
        .with_launcher(ProcessLauncher::new().with_cwd(cwd.to_path_buf()));

    let end = bridge
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    info!(?end, "Editor disconnected");
    std::process::exit(end.exit_code());
}

async fn install(settings: &Settings, yes: bool) -> anyhow::Result<()> {
    let activation = Activation::new(Arc::new(TokioRunner));
    let notifier = ConsoleNotifier::new(yes);

    match install_and_verify(&activation, settings, &notifier).await? {
        Some(environment) => println!(
            "Installed esbonio {} into {}",
            environment.version_str().trim(),
            environment.executable_path.display()
        ),
        None => println!("Cancelled."),
    }
    Ok(())
}

/// Install, then check that the managed environment can run the server.
///
/// Returns `Ok(None)` when the user declines.
async fn install_and_verify(
    activation: &Activation,
    settings: &Settings,
    notifier: &dyn Notifier,
) -> anyhow::Result<Option<ResolvedEnvironment>> {
    let Some(job) = activation.install(settings, notifier).await? else {
        return Ok(None);
    };
    match activation.resolver().resolve_managed(&settings.storage_root).await {
        Some(environment) => Ok(Some(environment)),
        None => anyhow::bail!(
            "esbonio is still not available in {} after installing",
            job.venv_dir.display()
        ),
    }
}

async fn show_plan(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let activation = Activation::new(Arc::new(TokioRunner));
    let configured = settings.server.python_path.as_deref();

    let Some(environment) = activation
        .resolver()
        .resolve(configured, &settings.storage_root)
        .await?
    else {
        anyhow::bail!(
            "No interpreter with esbonio found. Run `esbonio-bridge install` to create one."
        );
    };
    let launch = plan(&environment, settings);

    if json {
        let output = serde_json::json!({
            "environment": environment,
            "plan": launch,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Interpreter: {}", environment.executable_path.display());
    println!(
        "Version:     {}",
        environment.version.as_deref().unwrap_or("unknown")
    );
    println!("Command:     {} {}", launch.command.display(), launch.args.join(" "));
    if let Some(options) = launch.initialization_options_value() {
        println!("Initialization options:");
        println!("{}", serde_json::to_string_pretty(&options)?);
    }
    Ok(())
}

fn print_version() {
    println!("esbonio-bridge {}", env!("CARGO_PKG_VERSION"));
    println!(
        "installs {} {}",
        esbonio_bridge_core::SERVER_PACKAGE,
        esbonio_bridge_core::SERVER_PINNED_VERSION
    );
}
