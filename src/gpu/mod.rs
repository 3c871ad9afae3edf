//! Read-only GPU capability report, printed at the end of a run.

pub mod classify;

pub use classify::{ClassifierRule, Tier, classify};

use serde::Serialize;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::exec::{CommandSpec, RunOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityReport {
    pub device_name: String,
    pub compute_capability: Option<String>,
    pub driver_version: Option<String>,
    pub tier: Tier,
    pub notes: String,
    /// `nvidia-smi -q` lists an Encoder block
    pub encoder: bool,
    pub decoder: bool,
    /// `None` when the container checks did not run
    pub container_gpu_visible: Option<bool>,
    pub nvenc_in_container: Option<bool>,
}

impl CapabilityReport {
    /// What the probe reports when the driver cannot be queried
    pub fn unknown() -> Self {
        Self {
            device_name: "unknown".to_string(),
            compute_capability: None,
            driver_version: None,
            tier: Tier::Unknown,
            notes: "driver not queryable (not loaded until reboot?)".to_string(),
            encoder: false,
            decoder: false,
            container_gpu_visible: None,
            nvenc_in_container: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.tier == Tier::Unknown && self.driver_version.is_none()
    }
}

/// Queries the installed driver; never changes the host
#[derive(Debug, Default)]
pub struct CapabilityProbe;

impl CapabilityProbe {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, ctx: &RunContext<'_>) -> CapabilityReport {
        info!("🔬 Probing GPU capabilities");
        let Some(mut report) = self.query(ctx).await else {
            warn!("⚠️  GPU query failed, capability report unavailable");
            return CapabilityReport::unknown();
        };

        info!(
            "  {} (compute {}) driver {}",
            report.device_name,
            report.compute_capability.as_deref().unwrap_or("?"),
            report.driver_version.as_deref().unwrap_or("?")
        );
        info!("  {}: {}", report.tier, report.notes);
        info!(
            "  encoder: {}  decoder: {}",
            yes_no(report.encoder),
            yes_no(report.decoder)
        );

        if ctx.config.probe.container_checks
            && ctx.confirm("Run disposable containers to verify GPU access and NVENC?", false)
        {
            self.container_checks(ctx, &mut report).await;
        }
        report
    }

    async fn query(&self, ctx: &RunContext<'_>) -> Option<CapabilityReport> {
        let query = ctx
            .probe(&CommandSpec::new("nvidia-smi").args([
                "--query-gpu=name,compute_cap,driver_version",
                "--format=csv,noheader",
            ]))
            .await
            .filter(|r| r.success())?;

        let line = query.stdout.lines().find(|l| !l.trim().is_empty())?;
        let mut fields = line.split(',').map(|f| f.trim().to_string());
        let device_name = fields.next().filter(|n| !n.is_empty())?;
        let compute_capability = fields.next().filter(|f| !f.is_empty());
        let driver_version = fields.next().filter(|f| !f.is_empty());

        let details = ctx
            .probe(&CommandSpec::new("nvidia-smi").arg("-q"))
            .await
            .filter(|r| r.success())
            .map(|r| r.stdout)
            .unwrap_or_default();

        let (tier, notes) = match classify(&device_name) {
            Some(rule) => (rule.tier, rule.notes.to_string()),
            None => (Tier::Unknown, "unrecognised model, check NVENC support manually".to_string()),
        };

        Some(CapabilityReport {
            device_name,
            compute_capability,
            driver_version,
            tier,
            notes,
            encoder: has_block(&details, "Encoder"),
            decoder: has_block(&details, "Decoder"),
            container_gpu_visible: None,
            nvenc_in_container: None,
        })
    }

    async fn container_checks(&self, ctx: &RunContext<'_>, report: &mut CapabilityReport) {
        let probe = &ctx.config.probe;

        let cuda = CommandSpec::new("docker")
            .args(["run", "--rm", "--gpus", "all"])
            .arg(&probe.cuda_image)
            .arg("nvidia-smi");
        let visible = matches!(
            ctx.run(&cuda, RunOptions::progress("Running CUDA container")).await,
            Ok(ref r) if r.success()
        );
        report.container_gpu_visible = Some(visible);
        info!("  GPU visible in containers: {}", yes_no(visible));

        let ffmpeg = CommandSpec::new("docker")
            .args(["run", "--rm", "--gpus", "all", "-e", "NVIDIA_DRIVER_CAPABILITIES=compute,video,utility"])
            .arg(&probe.ffmpeg_image)
            .args(["-hide_banner", "-encoders"]);
        let nvenc = match ctx.run(&ffmpeg, RunOptions::progress("Listing FFmpeg encoders")).await {
            Ok(r) => r.success() && r.combined_output().contains("h264_nvenc"),
            Err(_) => false,
        };
        report.nvenc_in_container = Some(nvenc);
        info!("  NVENC available to FFmpeg: {}", yes_no(nvenc));
    }
}

fn has_block(details: &str, label: &str) -> bool {
    details.lines().any(|line| line.trim_start().starts_with(label))
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
