//! Activation: from settings to a launch plan.
//!
//! Activation prepares the storage root, resolves an interpreter, offers
//! to install the server when none is found, and plans the launch. It
//! runs to completion or fails with an [`ActivationError`]; every failure
//! has already been reported through the [`Notifier`] when it returns.

use crate::error::{ActivationError, InstallError};
use crate::install::{InstallJob, InstallManager};
use crate::platform::Platform;
use crate::probe::ServerProbe;
use crate::resolver::{EnvironmentResolver, SystemDiscovery};
use crate::runner::ProcessRunner;
use esbonio_bridge_core::{plan, LaunchPlan, Notifier, ResolvedEnvironment, Settings, SERVER_MODULE};
use std::sync::Arc;

/// Question asked before touching the managed environment.
pub const INSTALL_PROMPT: &str = "Install/Upgrade \"esbonio\"?";

/// Result of a successful activation.
#[derive(Debug, Clone, PartialEq)]
pub struct Activated {
    pub environment: ResolvedEnvironment,
    pub plan: LaunchPlan,
}

/// Orchestrates resolution, installation and planning.
pub struct Activation {
    resolver: EnvironmentResolver,
    installer: InstallManager,
}

impl Activation {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            resolver: EnvironmentResolver::new(ServerProbe::new(runner.clone())),
            installer: InstallManager::new(runner),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.resolver = self.resolver.with_platform(platform);
        self.installer = self.installer.with_platform(platform);
        self
    }

    pub fn with_system_discovery(mut self, system: SystemDiscovery) -> Self {
        self.resolver = self.resolver.with_system_discovery(system);
        self
    }

    pub fn with_installer(mut self, installer: InstallManager) -> Self {
        self.installer = installer;
        self
    }

    pub fn resolver(&self) -> &EnvironmentResolver {
        &self.resolver
    }

    pub fn installer(&self) -> &InstallManager {
        &self.installer
    }

    /// Resolve, install if needed and accepted, and plan the launch.
    pub async fn activate(
        &self,
        settings: &Settings,
        notifier: &dyn Notifier,
    ) -> Result<Activated, ActivationError> {
        let cache_dir = settings.cache_dir();
        if let Err(source) = tokio::fs::create_dir_all(&cache_dir).await {
            notifier
                .error(&format!(
                    "Failed to create storage directory {}: {source}",
                    cache_dir.display()
                ))
                .await;
            return Err(ActivationError::Storage {
                path: cache_dir,
                source,
            });
        }

        let configured = settings.server.python_path.as_deref();
        let resolved = match self.resolver.resolve(configured, &settings.storage_root).await {
            Ok(resolved) => resolved,
            Err(e) => {
                notifier
                    .error(&format!(
                        "Exit, because \"{SERVER_MODULE}\" does not exist in your \"esbonio.server.pythonPath\" setting"
                    ))
                    .await;
                return Err(e.into());
            }
        };

        let environment = match resolved {
            Some(environment) => environment,
            None => self.install_and_resolve(settings, notifier).await?,
        };

        let plan = plan(&environment, settings);
        Ok(Activated { environment, plan })
    }

    /// Reinstall the managed environment after asking the user.
    ///
    /// Returns `Ok(None)` when the user declines.
    pub async fn install(
        &self,
        settings: &Settings,
        notifier: &dyn Notifier,
    ) -> Result<Option<InstallJob>, InstallError> {
        if !notifier.confirm(INSTALL_PROMPT).await {
            tracing::info!("Install declined");
            return Ok(None);
        }
        self.install_confirmed(settings, notifier).await.map(Some)
    }

    /// Reinstall the managed environment without asking.
    pub async fn install_confirmed(
        &self,
        settings: &Settings,
        notifier: &dyn Notifier,
    ) -> Result<InstallJob, InstallError> {
        let Some(base) = self.resolver.system().find(true) else {
            let err = InstallError::NoBaseInterpreter;
            notifier.error(&err.to_string()).await;
            return Err(err);
        };
        self.installer
            .install(&base, &settings.storage_root, notifier)
            .await
    }

    async fn install_and_resolve(
        &self,
        settings: &Settings,
        notifier: &dyn Notifier,
    ) -> Result<ResolvedEnvironment, ActivationError> {
        match self.install(settings, notifier).await {
            Ok(_) => {}
            // Already reported by the installer.
            Err(e) => tracing::warn!(error = %e, "Continuing after failed install"),
        }

        match self.resolver.resolve_managed(&settings.storage_root).await {
            Some(environment) => Ok(environment),
            None => {
                notifier
                    .error(&format!("Exit, because \"{SERVER_MODULE}\" does not exist."))
                    .await;
                Err(ActivationError::ServerNotFound)
            }
        }
    }
}
