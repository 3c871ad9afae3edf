//! NVIDIA kernel driver detection, mismatch repair and installation

pub mod patch;

pub use patch::NvencPatchStep;

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::error::{DriverError, Result};
use crate::exec::{CommandSpec, RunOptions};
use crate::packages::PackagePattern;
use crate::step::{Decision, FailurePolicy, ProvisioningStep};
use crate::types::{VersionSource, VersionSpec};

static DRIVER_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Driver Version:\s*([0-9][0-9.]*)").expect("static regex"));

const REBOOT_FOR_MODULE: &str = "Reboot to load the NVIDIA kernel module";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    NotInstalled,
    InstalledWorking { version: Option<String> },
    /// Kernel module and userspace libraries disagree
    InstalledMismatched,
}

/// Converges the host onto a working NVIDIA driver
#[derive(Debug, Default)]
pub struct DriverProvisioner;

impl DriverProvisioner {
    pub fn new() -> Self {
        Self
    }

    async fn repair(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        info!("🧹 Removing mismatched NVIDIA driver packages");
        let pattern = PackagePattern::Regex(ctx.config.driver.purge_pattern.clone());
        ctx.purge(&pattern).await.map_err(|e| DriverError::RepairFailed {
            stage: "purge".to_string(),
            reason: e.to_string(),
        })?;
        ctx.autoremove().await.map_err(|e| DriverError::RepairFailed {
            stage: "autoremove".to_string(),
            reason: e.to_string(),
        })?;
        ctx.mark_driver_changed();

        ctx.run_ok(
            &CommandSpec::new("update-initramfs").arg("-u"),
            RunOptions::progress("Regenerating initramfs"),
        )
        .await
        .map_err(|e| DriverError::RepairFailed {
            stage: "initramfs".to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn install_prerequisites(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let mut packages = ctx.config.driver.prerequisites.clone();
        match ctx.probe(&CommandSpec::new("uname").arg("-r")).await {
            Some(result) if result.success() && !result.stdout.trim().is_empty() => {
                packages.push(format!("linux-headers-{}", result.stdout.trim()));
            }
            _ => warn!("Could not determine the running kernel; skipping kernel headers"),
        }
        ctx.install(&packages).await?;
        Ok(())
    }

    /// Recommended branch from `ubuntu-drivers`, else the configured fallback
    async fn recommendation(&self, ctx: &RunContext<'_>) -> VersionSpec {
        let devices = ctx
            .probe(&CommandSpec::new("ubuntu-drivers").arg("devices"))
            .await
            .filter(|r| r.success())
            .and_then(|r| ctx.signatures.recommended_driver(&r.stdout));

        match devices {
            Some(version) => {
                info!("🔎 ubuntu-drivers recommends nvidia-driver-{}", version);
                VersionSpec::new(version, VersionSource::Detected)
            }
            None => {
                warn!(
                    "No driver recommendation found, falling back to {}",
                    ctx.config.driver.fallback_version
                );
                VersionSpec::new(ctx.config.driver.fallback_version.clone(), VersionSource::Fallback)
            }
        }
    }

    async fn install_driver(&self, ctx: &mut RunContext<'_>) -> Result<VersionSpec> {
        self.install_prerequisites(ctx).await?;
        let recommended = self.recommendation(ctx).await;

        if ctx.confirm("Install the recommended driver automatically (ubuntu-drivers autoinstall)?", true) {
            let auto = ctx
                .run(
                    &CommandSpec::new("ubuntu-drivers").arg("autoinstall"),
                    RunOptions::progress("Installing recommended driver"),
                )
                .await;
            match auto {
                Ok(result) if result.success() => return Ok(recommended),
                Ok(result) => warn!("⚠️  Automatic install failed: {}", result.failure_reason()),
                Err(e) => warn!("⚠️  Automatic install failed: {}", e),
            }
            info!("Falling back to {}", recommended.package_name());
            self.install_version(ctx, &recommended).await?;
            return Ok(recommended);
        }

        let answer = ctx
            .operator
            .input("NVIDIA driver version to install", &recommended.version);
        let answer = answer.trim();
        let chosen = if answer.is_empty() || answer == recommended.version {
            recommended
        } else if VersionSpec::is_branch(answer) {
            VersionSpec::new(answer, VersionSource::Operator)
        } else {
            warn!("'{}' is not a driver branch, using {}", answer, recommended.version);
            recommended
        };
        self.install_version(ctx, &chosen).await?;
        Ok(chosen)
    }

    async fn install_version(&self, ctx: &mut RunContext<'_>, version: &VersionSpec) -> Result<()> {
        ctx.install(&[version.package_name()])
            .await
            .map_err(|e| DriverError::InstallFailed {
                version: version.version.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn load_module(&self, ctx: &mut RunContext<'_>) {
        let module = ctx.config.driver.kernel_module.clone();
        let loaded = ctx
            .run(&CommandSpec::new("modprobe").arg(&module), RunOptions::quiet())
            .await;
        match loaded {
            Ok(result) if result.success() => info!("✅ Kernel module {} loaded", module),
            Ok(result) => {
                warn!("Kernel module {} not loaded yet (expected before reboot): {}", module, result.stderr.trim());
                ctx.follow_up(REBOOT_FOR_MODULE);
            }
            Err(e) => {
                warn!("Could not run modprobe: {}", e);
                ctx.follow_up(REBOOT_FOR_MODULE);
            }
        }
    }
}

#[async_trait]
impl ProvisioningStep for DriverProvisioner {
    type State = DriverState;

    fn id(&self) -> &'static str {
        "driver"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Advisory
    }

    async fn detect(&self, ctx: &mut RunContext<'_>) -> Result<DriverState> {
        let Some(result) = ctx.probe(&CommandSpec::new("nvidia-smi")).await else {
            return Ok(DriverState::NotInstalled);
        };

        let output = result.combined_output();
        if ctx.signatures.is_version_mismatch(&output) {
            return Ok(DriverState::InstalledMismatched);
        }
        if !result.success() {
            return Ok(DriverState::NotInstalled);
        }

        let version = DRIVER_VERSION
            .captures(&output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        Ok(DriverState::InstalledWorking { version })
    }

    fn decide(&self, state: &DriverState, ctx: &RunContext<'_>) -> Result<Decision> {
        match state {
            DriverState::InstalledMismatched => {
                warn!("❌ NVIDIA driver/library version mismatch detected");
                if ctx.confirm("Purge the installed NVIDIA driver and reinstall it?", true) {
                    Ok(Decision::Repair)
                } else {
                    Err(DriverError::RepairDeclined.into())
                }
            }
            DriverState::InstalledWorking { version } => {
                let label = version.as_deref().unwrap_or("unknown version");
                if ctx.confirm(&format!("NVIDIA driver {} is working. Reinstall it?", label), false) {
                    Ok(Decision::Install)
                } else {
                    Ok(Decision::Skip(format!("driver {} already working", label)))
                }
            }
            DriverState::NotInstalled => Ok(Decision::Install),
        }
    }

    async fn apply(
        &self,
        decision: &Decision,
        _state: &DriverState,
        ctx: &mut RunContext<'_>,
    ) -> Result<String> {
        if *decision == Decision::Repair {
            self.repair(ctx).await?;
        }

        let installed = self.install_driver(ctx).await?;
        ctx.mark_driver_changed();
        let resolved = ctx.resolve_driver_version(installed).clone();
        info!("✅ Installed {}", resolved.package_name());
        self.load_module(ctx).await;

        let prefix = if *decision == Decision::Repair {
            "repaired, "
        } else {
            ""
        };
        Ok(format!("{}installed driver {}", prefix, resolved))
    }
}
