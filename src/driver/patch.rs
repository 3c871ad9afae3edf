//! Optional NVENC / NvFBC session-limit patch from keylase/nvidia-patch

use async_trait::async_trait;
use std::path::Path;
use tracing::info;

use crate::context::RunContext;
use crate::error::Result;
use crate::exec::{CommandSpec, RunOptions};
use crate::step::{Decision, FailurePolicy, ProvisioningStep};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchState {
    pub driver_loaded: bool,
    /// A previous clone exists in the work directory
    pub checkout_present: bool,
}

#[derive(Debug, Default)]
pub struct NvencPatchStep;

impl NvencPatchStep {
    pub fn new() -> Self {
        Self
    }

    async fn sync_checkout(&self, ctx: &RunContext<'_>, present: bool) -> Result<()> {
        let patch = &ctx.config.patch;
        let dir = patch.work_dir.to_string_lossy().to_string();

        let command = if present {
            CommandSpec::new("git").args(["-C", dir.as_str(), "pull", "--ff-only"])
        } else {
            if let Some(parent) = patch.work_dir.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            CommandSpec::new("git").args(["clone", "--depth", "1", patch.repo_url.as_str(), dir.as_str()])
        };
        ctx.run_ok(&command, RunOptions::progress("Fetching nvidia-patch")).await?;
        Ok(())
    }
}

#[async_trait]
impl ProvisioningStep for NvencPatchStep {
    type State = PatchState;

    fn id(&self) -> &'static str {
        "nvenc-patch"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Advisory
    }

    async fn detect(&self, ctx: &mut RunContext<'_>) -> Result<PatchState> {
        let driver_loaded = match ctx.probe(&CommandSpec::new("nvidia-smi")).await {
            Some(result) => result.success() && !ctx.signatures.is_version_mismatch(&result.combined_output()),
            None => false,
        };
        Ok(PatchState {
            driver_loaded,
            checkout_present: is_checkout(&ctx.config.patch.work_dir),
        })
    }

    fn decide(&self, state: &PatchState, ctx: &RunContext<'_>) -> Result<Decision> {
        if !state.driver_loaded {
            return Ok(Decision::Skip("driver not loaded, patch after reboot".to_string()));
        }
        if ctx.confirm("Apply the NVENC/NvFBC session limit patch (keylase/nvidia-patch)?", false) {
            Ok(Decision::Install)
        } else {
            Ok(Decision::Skip("declined".to_string()))
        }
    }

    async fn apply(
        &self,
        _decision: &Decision,
        state: &PatchState,
        ctx: &mut RunContext<'_>,
    ) -> Result<String> {
        self.sync_checkout(ctx, state.checkout_present).await?;

        let work_dir = ctx.config.patch.work_dir.clone();
        for script in &ctx.config.patch.scripts {
            info!("🩹 Running {}", script);
            ctx.run_ok(
                &CommandSpec::new("bash").arg(script),
                RunOptions::progress(format!("Running {}", script)).in_dir(&work_dir),
            )
            .await?;
        }
        Ok(format!("applied {}", ctx.config.patch.scripts.join(", ")))
    }
}

fn is_checkout(dir: &Path) -> bool {
    dir.join(".git").is_dir()
}
