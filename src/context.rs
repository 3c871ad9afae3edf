use tracing::debug;

use crate::config::ProvisionConfig;
use crate::detect::Signatures;
use crate::error::{CommandError, InstallError, Result};
use crate::exec::{CommandRunner, CommandSpec, RunOptions};
use crate::net::Fetcher;
use crate::operator::Operator;
use crate::packages::{PackageInstaller, PackagePattern};
use crate::preflight::{Identity, ProcessIdentity};
use crate::types::{ExternalCommandResult, VersionSpec};

/// State scoped to a single provisioning run, passed explicitly to each step.
///
/// Replaces process-wide flags: the collaborators, the resolved
/// configuration, the one-shot package index guard and whatever the driver
/// step resolved. Dropped when the run ends.
pub struct RunContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub operator: &'a dyn Operator,
    pub fetcher: &'a dyn Fetcher,
    pub config: &'a ProvisionConfig,
    pub identity: &'a dyn Identity,
    pub signatures: Signatures,
    pub packages: PackageInstaller,
    driver_version: Option<VersionSpec>,
    driver_changed: bool,
    follow_ups: Vec<String>,
}

impl<'a> RunContext<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        operator: &'a dyn Operator,
        fetcher: &'a dyn Fetcher,
        config: &'a ProvisionConfig,
    ) -> Result<Self> {
        Ok(Self {
            runner,
            operator,
            fetcher,
            config,
            identity: &ProcessIdentity,
            signatures: Signatures::from_config(&config.signatures)?,
            packages: PackageInstaller::new(config.command_timeout()),
            driver_version: None,
            driver_changed: false,
            follow_ups: Vec::new(),
        })
    }

    pub fn with_identity(mut self, identity: &'a dyn Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Run with the configured default timeout unless `options` sets one
    pub async fn run(
        &self,
        command: &CommandSpec,
        options: RunOptions,
    ) -> std::result::Result<ExternalCommandResult, CommandError> {
        self.runner.run(command, &self.with_timeout(options)).await
    }

    pub async fn run_ok(
        &self,
        command: &CommandSpec,
        options: RunOptions,
    ) -> std::result::Result<ExternalCommandResult, CommandError> {
        self.runner.run_ok(command, &self.with_timeout(options)).await
    }

    /// Run a detection query. Spawn failures read as "not there".
    pub async fn probe(&self, command: &CommandSpec) -> Option<ExternalCommandResult> {
        match self.run(command, RunOptions::quiet()).await {
            Ok(result) => Some(result),
            Err(e) => {
                debug!("probe `{}` unavailable: {}", command, e);
                None
            }
        }
    }

    pub async fn install(&mut self, packages: &[String]) -> std::result::Result<(), InstallError> {
        self.packages.install(self.runner, packages).await
    }

    pub async fn refresh_index(&mut self) -> std::result::Result<(), InstallError> {
        self.packages.refresh_index(self.runner).await
    }

    pub async fn purge(&mut self, pattern: &PackagePattern) -> std::result::Result<(), InstallError> {
        self.packages.purge(self.runner, pattern).await
    }

    pub async fn autoremove(&mut self) -> std::result::Result<(), InstallError> {
        self.packages.autoremove(self.runner).await
    }

    pub async fn is_installed(&self, package: &str) -> bool {
        self.packages.is_installed(self.runner, package).await
    }

    pub fn confirm(&self, prompt: &str, default: bool) -> bool {
        self.operator.confirm(prompt, default)
    }

    /// Record the driver version chosen this run. The first resolution wins.
    pub fn resolve_driver_version(&mut self, version: VersionSpec) -> &VersionSpec {
        self.driver_version.get_or_insert(version)
    }

    pub fn driver_version(&self) -> Option<&VersionSpec> {
        self.driver_version.as_ref()
    }

    /// A driver was installed, repaired or purged; a reboot is pending
    pub fn mark_driver_changed(&mut self) {
        self.driver_changed = true;
    }

    pub fn driver_changed(&self) -> bool {
        self.driver_changed
    }

    pub fn follow_up(&mut self, action: impl Into<String>) {
        let action = action.into();
        if !self.follow_ups.contains(&action) {
            self.follow_ups.push(action);
        }
    }

    pub fn take_follow_ups(&mut self) -> Vec<String> {
        std::mem::take(&mut self.follow_ups)
    }

    fn with_timeout(&self, mut options: RunOptions) -> RunOptions {
        if options.timeout.is_none() {
            options.timeout = self.config.command_timeout();
        }
        options
    }
}
