//! Host requirement checks run before anything is installed.
//!
//! Hard checks (root, GPU on the bus) abort the run. Soft checks (OS release,
//! connectivity) only need the operator's go-ahead.

use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::ProvisionConfig;
use crate::context::RunContext;
use crate::detect::{OsRelease, parse_os_release};
use crate::error::{PreflightError, Result};
use crate::exec::CommandSpec;

/// Who the process runs as
pub trait Identity: Send + Sync {
    fn effective_uid(&self) -> u32;
}

/// The real process credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessIdentity;

impl Identity for ProcessIdentity {
    fn effective_uid(&self) -> u32 {
        nix::unistd::geteuid().as_raw()
    }
}

/// What the host must satisfy
#[derive(Debug, Clone)]
pub struct Requirements {
    pub vendor: String,
    pub os_id: String,
    pub supported_os_versions: Vec<String>,
    pub os_release_path: PathBuf,
    pub connectivity_url: String,
    pub allow_unsupported_os: bool,
}

impl Requirements {
    pub fn from_config(config: &ProvisionConfig) -> Self {
        Self {
            vendor: config.preflight.vendor.clone(),
            os_id: config.preflight.os_id.clone(),
            supported_os_versions: config.preflight.supported_os_versions.clone(),
            os_release_path: config.preflight.os_release_path.clone(),
            connectivity_url: config.preflight.connectivity_url.clone(),
            allow_unsupported_os: config.allow_unsupported_os,
        }
    }
}

/// Individual check outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckItem {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct PreflightReport {
    pub checks: Vec<CheckItem>,
    pub os: OsRelease,
}

impl PreflightReport {
    /// Every check passed outright (no operator override needed)
    pub fn clean(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    fn push(&mut self, name: &str, passed: bool, message: impl Into<String>) {
        let message = message.into();
        if passed {
            info!("  ✓ {}: {}", name, message);
        } else {
            warn!("  ✗ {}: {}", name, message);
        }
        self.checks.push(CheckItem {
            name: name.to_string(),
            passed,
            message,
        });
    }
}

pub struct PreflightChecker;

impl PreflightChecker {
    /// Run all checks in order. Returns the collected results, or the first
    /// hard failure / declined soft check.
    pub async fn check(ctx: &RunContext<'_>, requirements: &Requirements) -> Result<PreflightReport> {
        info!("🔍 Running preflight checks");
        let mut report = PreflightReport::default();

        Self::check_privilege(ctx, &mut report)?;
        Self::check_hardware(ctx, requirements, &mut report).await?;
        Self::check_os(ctx, requirements, &mut report).await?;
        Self::check_network(ctx, requirements, &mut report).await?;

        Ok(report)
    }

    fn check_privilege(ctx: &RunContext<'_>, report: &mut PreflightReport) -> Result<()> {
        let uid = ctx.identity.effective_uid();
        if uid != 0 {
            report.push("privilege", false, format!("effective uid {}", uid));
            return Err(PreflightError::NotPrivileged { uid }.into());
        }
        report.push("privilege", true, "running as root");
        Ok(())
    }

    async fn check_hardware(
        ctx: &RunContext<'_>,
        requirements: &Requirements,
        report: &mut PreflightReport,
    ) -> Result<()> {
        let vendor = requirements.vendor.to_lowercase();
        let device = ctx
            .probe(&CommandSpec::new("lspci"))
            .await
            .filter(|r| r.success())
            .and_then(|r| {
                r.stdout
                    .lines()
                    .find(|line| line.to_lowercase().contains(&vendor))
                    .map(|line| line.trim().to_string())
            });

        match device {
            Some(line) => {
                report.push("hardware", true, line);
                Ok(())
            }
            None => {
                report.push("hardware", false, format!("no {} device on the PCI bus", vendor));
                Err(PreflightError::HardwareMissing {
                    vendor: requirements.vendor.clone(),
                }
                .into())
            }
        }
    }

    async fn check_os(
        ctx: &RunContext<'_>,
        requirements: &Requirements,
        report: &mut PreflightReport,
    ) -> Result<()> {
        let content = tokio::fs::read_to_string(&requirements.os_release_path)
            .await
            .unwrap_or_default();
        let os = parse_os_release(&content);
        report.os = os.clone();

        let supported = os.id.eq_ignore_ascii_case(&requirements.os_id)
            && requirements.supported_os_versions.contains(&os.version_id);
        let description = if os.pretty_name.is_empty() {
            format!("{} {}", os.id, os.version_id).trim().to_string()
        } else {
            os.pretty_name.clone()
        };

        if supported {
            report.push("os", true, description);
            return Ok(());
        }

        let message = format!(
            "{} is not a tested release (expected {} {})",
            if description.is_empty() { "unknown OS" } else { description.as_str() },
            requirements.os_id,
            requirements.supported_os_versions.join(" / ")
        );
        report.push("os", false, message.clone());

        if requirements.allow_unsupported_os {
            warn!("Continuing on unsupported OS (allowed by configuration)");
            return Ok(());
        }
        if ctx.confirm(&format!("{}. Continue anyway?", message), false) {
            return Ok(());
        }
        Err(PreflightError::Declined {
            check: "OS".to_string(),
        }
        .into())
    }

    async fn check_network(
        ctx: &RunContext<'_>,
        requirements: &Requirements,
        report: &mut PreflightReport,
    ) -> Result<()> {
        if ctx.fetcher.reachable(&requirements.connectivity_url).await {
            report.push("network", true, format!("{} reachable", requirements.connectivity_url));
            return Ok(());
        }

        let message = format!("cannot reach {}", requirements.connectivity_url);
        report.push("network", false, message.clone());
        if ctx.confirm(&format!("{}; downloads will likely fail. Continue anyway?", message), false) {
            return Ok(());
        }
        Err(PreflightError::Declined {
            check: "network".to_string(),
        }
        .into())
    }
}
