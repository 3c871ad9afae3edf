//! apt-get wrapper with a run-scoped index refresh guard.

use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::InstallError;
use crate::exec::{CommandRunner, CommandSpec, RunOptions};

/// Packages selected for removal.
///
/// A `Regex` pattern is handed to apt as a single argv element and matched by
/// apt itself; it is never expanded by a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackagePattern {
    Name(String),
    Regex(String),
}

impl PackagePattern {
    pub fn as_arg(&self) -> &str {
        match self {
            PackagePattern::Name(name) => name,
            PackagePattern::Regex(pattern) => pattern,
        }
    }
}

impl fmt::Display for PackagePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Where the run-scoped `apt-get update` stands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum IndexRefresh {
    #[default]
    Pending,
    Done,
    Failed(String),
}

/// Installs packages through apt-get.
///
/// `apt-get update` runs at most once across all [`PackageInstaller::install`]
/// calls of a run: the first install refreshes, later ones go straight to
/// install. A failed refresh is not retried; later installs report the same
/// failure.
#[derive(Debug, Default)]
pub struct PackageInstaller {
    refresh: IndexRefresh,
    timeout: Option<Duration>,
}

impl PackageInstaller {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            refresh: IndexRefresh::Pending,
            timeout,
        }
    }

    pub fn index_refreshed(&self) -> bool {
        self.refresh == IndexRefresh::Done
    }

    /// Unconditional `apt-get update`, for callers that just registered a new
    /// source. Satisfies the guard for later installs. A failure after an
    /// earlier success leaves the guard satisfied.
    pub async fn refresh_index(&mut self, runner: &dyn CommandRunner) -> Result<(), InstallError> {
        info!("🔄 Refreshing package index");
        let outcome = match runner
            .run(&apt("update"), &self.options("Refreshing package index"))
            .await
        {
            Ok(result) if result.success() => Ok(()),
            Ok(result) => Err(result.stderr.trim().to_string()),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(()) => {
                self.refresh = IndexRefresh::Done;
                Ok(())
            }
            Err(stderr) => {
                if self.refresh == IndexRefresh::Pending {
                    self.refresh = IndexRefresh::Failed(stderr.clone());
                }
                Err(InstallError::RefreshFailed { stderr })
            }
        }
    }

    pub async fn install(
        &mut self,
        runner: &dyn CommandRunner,
        packages: &[String],
    ) -> Result<(), InstallError> {
        if packages.is_empty() {
            return Ok(());
        }

        if let IndexRefresh::Failed(stderr) = &self.refresh {
            return Err(InstallError::RefreshFailed {
                stderr: stderr.clone(),
            });
        }
        if self.refresh == IndexRefresh::Pending {
            self.refresh_index(runner).await?;
        } else {
            debug!("Package index already refreshed this run");
        }

        let joined = packages.join(" ");
        info!("📦 Installing {}", joined);
        let command = apt("install").arg("-y").args(packages.iter().cloned());
        let result = runner
            .run(&command, &self.options(format!("Installing {}", joined)))
            .await
            .map_err(|e| InstallError::InstallFailed {
                packages: joined.clone(),
                stderr: e.to_string(),
            })?;

        if !result.success() {
            return Err(InstallError::InstallFailed {
                packages: joined,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    pub async fn purge(
        &mut self,
        runner: &dyn CommandRunner,
        pattern: &PackagePattern,
    ) -> Result<(), InstallError> {
        info!("🧹 Purging packages matching {}", pattern);
        let command = apt("purge").arg("-y").arg(pattern.as_arg());
        self.run_removal(runner, command, pattern.to_string()).await
    }

    pub async fn autoremove(&mut self, runner: &dyn CommandRunner) -> Result<(), InstallError> {
        let command = apt("autoremove").arg("-y");
        self.run_removal(runner, command, "autoremove".to_string())
            .await
    }

    /// `dpkg-query` reports the package as fully installed
    pub async fn is_installed(&self, runner: &dyn CommandRunner, package: &str) -> bool {
        let command = CommandSpec::new("dpkg-query")
            .args(["-W", "-f=${Status}"])
            .arg(package);
        match runner.run(&command, &RunOptions::quiet()).await {
            Ok(result) => result.success() && result.stdout.contains("install ok installed"),
            Err(_) => false,
        }
    }

    async fn run_removal(
        &self,
        runner: &dyn CommandRunner,
        command: CommandSpec,
        pattern: String,
    ) -> Result<(), InstallError> {
        let result = runner
            .run(&command, &self.options(format!("Removing {}", pattern)))
            .await
            .map_err(|e| InstallError::PurgeFailed {
                pattern: pattern.clone(),
                stderr: e.to_string(),
            })?;
        if !result.success() {
            return Err(InstallError::PurgeFailed {
                pattern,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn options(&self, label: impl Into<String>) -> RunOptions {
        let options = RunOptions::progress(label);
        match self.timeout {
            Some(timeout) => options.with_timeout(timeout),
            None => options,
        }
    }
}

fn apt(subcommand: &str) -> CommandSpec {
    CommandSpec::new("apt-get")
        .arg(subcommand)
        .env("DEBIAN_FRONTEND", "noninteractive")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{Reply, ScriptedRunner};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn first_install_refreshes_then_never_again() {
        let runner = ScriptedRunner::new();
        let mut packages = PackageInstaller::new(None);
        assert!(!packages.index_refreshed());

        packages.install(&runner, &names(&["dkms"])).await.unwrap();
        packages.install(&runner, &names(&["build-essential"])).await.unwrap();
        packages.install(&runner, &names(&["curl", "git"])).await.unwrap();

        assert!(packages.index_refreshed());
        assert_eq!(runner.count("apt-get update"), 1);
        assert_eq!(runner.count("apt-get install"), 3);
        assert_eq!(
            runner.commands()[0], "apt-get update",
            "refresh must precede the first install"
        );
    }

    #[tokio::test]
    async fn failed_refresh_leaves_flag_unset() {
        let runner = ScriptedRunner::new().fail("apt-get update", "Temporary failure resolving");
        let mut packages = PackageInstaller::new(None);
        let err = packages.install(&runner, &names(&["dkms"])).await.unwrap_err();
        assert!(matches!(err, InstallError::RefreshFailed { .. }));
        assert!(!packages.index_refreshed());
        assert_eq!(runner.count("apt-get install"), 0);
    }

    #[tokio::test]
    async fn failed_refresh_is_not_attempted_again_by_install() {
        let runner = ScriptedRunner::new().fail("apt-get update", "Temporary failure resolving");
        let mut packages = PackageInstaller::new(None);

        for list in [["dkms"], ["git"], ["curl"]] {
            let err = packages.install(&runner, &names(&list)).await.unwrap_err();
            match err {
                InstallError::RefreshFailed { stderr } => {
                    assert_eq!(stderr, "Temporary failure resolving")
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(runner.count("apt-get update"), 1);
        assert_eq!(runner.count("apt-get install"), 0);
    }

    #[tokio::test]
    async fn failed_explicit_refresh_keeps_earlier_success() {
        let runner = ScriptedRunner::new().sequence(
            "apt-get update",
            vec![Reply::ok(""), Reply::fail(100, "Hash Sum mismatch")],
        );
        let mut packages = PackageInstaller::new(None);

        packages.install(&runner, &names(&["dkms"])).await.unwrap();
        assert!(packages.refresh_index(&runner).await.is_err());
        assert!(packages.index_refreshed());
        packages.install(&runner, &names(&["git"])).await.unwrap();
        assert_eq!(runner.count("apt-get update"), 2);
        assert_eq!(runner.count("apt-get install"), 2);
    }

    #[tokio::test]
    async fn empty_install_is_a_no_op() {
        let runner = ScriptedRunner::new();
        let mut packages = PackageInstaller::new(None);
        packages.install(&runner, &[]).await.unwrap();
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn purge_passes_pattern_as_single_argument() {
        let runner = ScriptedRunner::new();
        let mut packages = PackageInstaller::new(None);
        packages
            .purge(&runner, &PackagePattern::Regex("^nvidia-.*".to_string()))
            .await
            .unwrap();

        let specs = runner.specs();
        assert_eq!(specs.len(), 1);
        assert!(!specs[0].is_shell());
        assert_eq!(specs[0].args, vec!["purge", "-y", "^nvidia-.*"]);
        assert!(
            specs[0]
                .env
                .contains(&("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()))
        );
    }

    #[tokio::test]
    async fn is_installed_reads_dpkg_status() {
        let runner = ScriptedRunner::new()
            .respond("dpkg-query -W -f=${Status} nvidia-container-toolkit", "install ok installed");
        let packages = PackageInstaller::new(None);
        assert!(packages.is_installed(&runner, "nvidia-container-toolkit").await);

        let runner = ScriptedRunner::new().fail("dpkg-query", "no packages found");
        assert!(!packages.is_installed(&runner, "nvidia-container-toolkit").await);
    }
}
