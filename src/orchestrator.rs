//! Linear provisioning run: preflight, driver, container stack, probe.

use std::time::Instant;
use tracing::{info, warn};

use crate::config::ProvisionConfig;
use crate::container::{ComposeHelperStep, EngineRepairStep, EngineStep, GpuRuntimeStep};
use crate::context::RunContext;
use crate::driver::{DriverProvisioner, NvencPatchStep};
use crate::error::{PreflightError, ProvisionError, Result};
use crate::exec::{CommandRunner, CommandSpec, RunOptions};
use crate::gpu::CapabilityProbe;
use crate::net::Fetcher;
use crate::operator::Operator;
use crate::preflight::{Identity, PreflightChecker, ProcessIdentity, Requirements};
use crate::report::{RunReport, StepStatus};
use crate::step::converge;

/// A reboot the operator agreed to. Carried out by the caller as the very
/// last action of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebootRequest {
    pub reason: String,
}

impl RebootRequest {
    pub async fn execute(&self, runner: &dyn CommandRunner) -> Result<()> {
        info!("🔁 Rebooting: {}", self.reason);
        runner
            .run_ok(&CommandSpec::new("systemctl").arg("reboot"), &RunOptions::quiet())
            .await?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        report: RunReport,
        reboot: Option<RebootRequest>,
    },
    /// The operator backed out before anything was changed
    Cancelled { reason: String },
}

pub struct Orchestrator<'a> {
    runner: &'a dyn CommandRunner,
    operator: &'a dyn Operator,
    fetcher: &'a dyn Fetcher,
    config: &'a ProvisionConfig,
    identity: &'a dyn Identity,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        operator: &'a dyn Operator,
        fetcher: &'a dyn Fetcher,
        config: &'a ProvisionConfig,
    ) -> Self {
        Self {
            runner,
            operator,
            fetcher,
            config,
            identity: &ProcessIdentity,
        }
    }

    /// Check privilege against `identity` instead of the process credentials
    pub fn with_identity(mut self, identity: &'a dyn Identity) -> Self {
        self.identity = identity;
        self
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        let started = Instant::now();
        let mut ctx = RunContext::new(self.runner, self.operator, self.fetcher, self.config)?
            .with_identity(self.identity);
        let mut report = RunReport::new();

        info!("🚀 Provisioning NVIDIA driver, Docker and the NVIDIA Container Toolkit");
        if !ctx.confirm("Proceed with provisioning?", true) {
            return Ok(RunOutcome::Cancelled {
                reason: "declined at start".to_string(),
            });
        }

        match PreflightChecker::check(&ctx, &Requirements::from_config(self.config)).await {
            Ok(preflight) => {
                let detail = if preflight.clean() {
                    "all checks passed"
                } else {
                    "passed with operator overrides"
                };
                report.record("preflight", StepStatus::Applied, detail);
            }
            Err(ProvisionError::Preflight(PreflightError::Declined { check })) => {
                warn!("Cancelled: {} check declined", check);
                return Ok(RunOutcome::Cancelled {
                    reason: format!("{} check declined", check),
                });
            }
            Err(e) => {
                report.record("preflight", StepStatus::Failed, e.to_string());
                return Err(e);
            }
        }

        converge(&DriverProvisioner::new(), &mut ctx, &mut report).await?;
        converge(&EngineStep::new(), &mut ctx, &mut report).await?;
        converge(&EngineRepairStep::new(), &mut ctx, &mut report).await?;
        converge(&GpuRuntimeStep::new(), &mut ctx, &mut report).await?;
        converge(&ComposeHelperStep::new(), &mut ctx, &mut report).await?;
        converge(&NvencPatchStep::new(), &mut ctx, &mut report).await?;

        let capability = CapabilityProbe::new().run(&ctx).await;
        if capability.is_unknown() {
            report.record("capability-probe", StepStatus::Skipped, "driver not queryable");
        } else {
            report.record(
                "capability-probe",
                StepStatus::Applied,
                format!("{} ({})", capability.device_name, capability.tier),
            );
        }
        report.capability = Some(capability);

        for failed in report.failures().map(|s| s.id.clone()).collect::<Vec<_>>() {
            ctx.follow_up(format!("Re-run nvprep after resolving the {} failure", failed));
        }
        report.driver_version = ctx.driver_version().cloned();
        let reboot = self.reboot_request(&mut ctx);
        report.add_follow_ups(ctx.take_follow_ups());
        report.elapsed = started.elapsed();

        Ok(RunOutcome::Completed { report, reboot })
    }

    fn reboot_request(&self, ctx: &mut RunContext<'_>) -> Option<RebootRequest> {
        if !ctx.driver_changed() {
            return None;
        }
        let reason = "NVIDIA driver changed".to_string();
        if ctx.confirm("A reboot is required to load the new driver. Reboot now?", false) {
            Some(RebootRequest { reason })
        } else {
            ctx.follow_up("Reboot to finish the driver installation");
            None
        }
    }
}
