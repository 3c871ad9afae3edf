//! Docker engine, NVIDIA Container Toolkit and compose helper provisioning.
//!
//! The engine steps are fatal on failure since everything after them needs a
//! running daemon. Toolkit and helper failures leave a usable engine behind
//! and are only reported.

pub mod daemon_config;

pub use daemon_config::DaemonConfig;

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::detect::{docker_version, toolkit_version};
use crate::error::{Result, RuntimeError};
use crate::exec::{CommandSpec, RunOptions};
use crate::step::{Decision, FailurePolicy, ProvisioningStep};

static UNSIGNED_DEB_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(\s*deb)\s+(https?://)").expect("static regex"));

fn systemctl(action: &str, service: &str) -> CommandSpec {
    CommandSpec::new("systemctl").arg(action).arg(service)
}

// ---------------------------------------------------------------------------
// Engine install
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineState {
    /// `None` when `docker` is not on the host
    pub version: Option<String>,
}

/// Installs Docker through the vendor convenience script
#[derive(Debug, Default)]
pub struct EngineStep;

impl EngineStep {
    pub fn new() -> Self {
        Self
    }

    async fn installed_version(ctx: &RunContext<'_>) -> Option<String> {
        ctx.probe(&CommandSpec::new("docker").arg("--version"))
            .await
            .filter(|r| r.success())
            .map(|r| docker_version(&r.stdout).unwrap_or_else(|| "unknown".to_string()))
    }

    async fn install(&self, ctx: &RunContext<'_>) -> Result<String> {
        let docker = &ctx.config.docker;
        let failed = |reason: String| RuntimeError::EngineInstallFailed { reason };

        info!("🐳 Downloading Docker install script");
        ctx.fetcher
            .download(&docker.install_script_url, &docker.install_script_path)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let script = docker.install_script_path.to_string_lossy().to_string();
        ctx.run_ok(
            &CommandSpec::new("sh").arg(script),
            RunOptions::progress("Installing Docker"),
        )
        .await
        .map_err(|e| failed(e.to_string()))?;

        ctx.run_ok(
            &CommandSpec::new("systemctl").args(["enable", "--now", docker.service.as_str()]),
            RunOptions::quiet(),
        )
        .await
        .map_err(|e| failed(e.to_string()))?;

        let version = Self::installed_version(ctx)
            .await
            .ok_or_else(|| failed("docker is still not available after running the install script".to_string()))?;
        Ok(version)
    }
}

#[async_trait]
impl ProvisioningStep for EngineStep {
    type State = EngineState;

    fn id(&self) -> &'static str {
        "docker-engine"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    async fn detect(&self, ctx: &mut RunContext<'_>) -> Result<EngineState> {
        Ok(EngineState {
            version: Self::installed_version(ctx).await,
        })
    }

    fn decide(&self, state: &EngineState, _ctx: &RunContext<'_>) -> Result<Decision> {
        Ok(match &state.version {
            Some(version) => Decision::Skip(format!("Docker {} already installed", version)),
            None => Decision::Install,
        })
    }

    async fn apply(
        &self,
        _decision: &Decision,
        _state: &EngineState,
        ctx: &mut RunContext<'_>,
    ) -> Result<String> {
        let version = self.install(ctx).await?;
        info!("✅ Docker {} installed and enabled", version);
        Ok(format!("installed Docker {}", version))
    }
}

// ---------------------------------------------------------------------------
// Engine repair
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineHealth {
    Healthy,
    /// The service refuses to start, usually a broken daemon.json
    FailedStart,
    /// No service manager to ask
    Unknown,
}

/// Resets a daemon that refuses to start back to its default configuration
#[derive(Debug, Default)]
pub struct EngineRepairStep;

impl EngineRepairStep {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProvisioningStep for EngineRepairStep {
    type State = EngineHealth;

    fn id(&self) -> &'static str {
        "docker-repair"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    async fn detect(&self, ctx: &mut RunContext<'_>) -> Result<EngineHealth> {
        let status = ctx
            .probe(&systemctl("status", &ctx.config.docker.service))
            .await;
        Ok(match status {
            Some(result) if ctx.signatures.is_docker_failed_start(&result.combined_output()) => {
                EngineHealth::FailedStart
            }
            Some(_) => EngineHealth::Healthy,
            None => EngineHealth::Unknown,
        })
    }

    fn decide(&self, state: &EngineHealth, _ctx: &RunContext<'_>) -> Result<Decision> {
        Ok(match state {
            EngineHealth::FailedStart => {
                warn!("❌ Docker failed to start, resetting its configuration");
                Decision::Repair
            }
            EngineHealth::Healthy => Decision::Skip("service healthy".to_string()),
            EngineHealth::Unknown => Decision::Skip("service status unavailable".to_string()),
        })
    }

    async fn apply(
        &self,
        _decision: &Decision,
        _state: &EngineHealth,
        ctx: &mut RunContext<'_>,
    ) -> Result<String> {
        let docker = &ctx.config.docker;
        let failed = |reason: String| RuntimeError::EngineRepairFailed { reason };

        ctx.run_ok(&systemctl("stop", &docker.service), RunOptions::quiet())
            .await
            .map_err(|e| failed(e.to_string()))?;

        match tokio::fs::remove_file(&docker.daemon_config_path).await {
            Ok(()) => info!("🗑️  Removed {}", docker.daemon_config_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(failed(format!("removing {}: {}", docker.daemon_config_path.display(), e)).into()),
        }

        ctx.run_ok(
            &systemctl("restart", &docker.service),
            RunOptions::progress("Restarting Docker"),
        )
        .await
        .map_err(|e| failed(e.to_string()))?;

        Ok("configuration reset, service restarted".to_string())
    }
}

// ---------------------------------------------------------------------------
// NVIDIA Container Toolkit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolkitState {
    pub package_installed: bool,
    pub runtime_registered: bool,
}

/// Installs the NVIDIA Container Toolkit and makes `nvidia` Docker's
/// default runtime
#[derive(Debug, Default)]
pub struct GpuRuntimeStep;

impl GpuRuntimeStep {
    pub fn new() -> Self {
        Self
    }

    async fn register_repository(&self, ctx: &RunContext<'_>) -> Result<()> {
        let toolkit = &ctx.config.toolkit;

        let armored = toolkit.keyring_path.with_extension("asc");
        if let Some(parent) = toolkit.keyring_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        ctx.fetcher.download(&toolkit.gpg_key_url, &armored).await?;
        let dearmor = ctx
            .run_ok(
                &CommandSpec::new("gpg").args([
                    "--dearmor".to_string(),
                    "--yes".to_string(),
                    "-o".to_string(),
                    toolkit.keyring_path.to_string_lossy().to_string(),
                    armored.to_string_lossy().to_string(),
                ]),
                RunOptions::quiet(),
            )
            .await;
        let _ = tokio::fs::remove_file(&armored).await;
        dearmor?;

        let list = ctx.fetcher.fetch_text(&toolkit.repo_list_url).await?;
        let signed = signed_repo_list(&list, &toolkit.keyring_path);
        if let Some(parent) = toolkit.repo_list_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&toolkit.repo_list_path, signed).await?;
        info!("📝 Registered {}", toolkit.repo_list_path.display());
        Ok(())
    }

    async fn provision(&self, ctx: &mut RunContext<'_>) -> Result<String> {
        self.register_repository(ctx).await?;

        ctx.refresh_index().await?;
        let packages = ctx.config.toolkit.packages.clone();
        ctx.install(&packages).await?;

        ctx.run_ok(
            &CommandSpec::new("nvidia-ctk").args(["runtime", "configure", "--runtime=docker", "--set-as-default"]),
            RunOptions::quiet(),
        )
        .await?;

        DaemonConfig::default()
            .converge(&ctx.config.docker.daemon_config_path)
            .await?;
        ctx.run_ok(
            &systemctl("restart", &ctx.config.docker.service),
            RunOptions::progress("Restarting Docker"),
        )
        .await?;

        let version = ctx
            .probe(&CommandSpec::new("nvidia-ctk").arg("--version"))
            .await
            .and_then(|r| toolkit_version(&r.stdout));
        Ok(match version {
            Some(v) => format!("toolkit {} installed, nvidia is the default runtime", v),
            None => "toolkit installed, nvidia is the default runtime".to_string(),
        })
    }
}

#[async_trait]
impl ProvisioningStep for GpuRuntimeStep {
    type State = ToolkitState;

    fn id(&self) -> &'static str {
        "nvidia-toolkit"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Advisory
    }

    async fn detect(&self, ctx: &mut RunContext<'_>) -> Result<ToolkitState> {
        let package_installed = ctx.is_installed(&ctx.config.toolkit.marker_package).await;
        let runtime_registered = ctx
            .probe(&CommandSpec::new("docker").arg("info"))
            .await
            .filter(|r| r.success())
            .map(|r| ctx.signatures.lists_nvidia_runtime(&r.stdout))
            .unwrap_or(false);
        Ok(ToolkitState {
            package_installed,
            runtime_registered,
        })
    }

    fn decide(&self, state: &ToolkitState, ctx: &RunContext<'_>) -> Result<Decision> {
        if !state.package_installed || !state.runtime_registered {
            return Ok(Decision::Install);
        }
        if ctx.confirm("NVIDIA Container Toolkit is already set up. Force an update?", false) {
            Ok(Decision::Install)
        } else {
            Ok(Decision::Skip("toolkit installed and runtime registered".to_string()))
        }
    }

    async fn apply(
        &self,
        _decision: &Decision,
        _state: &ToolkitState,
        ctx: &mut RunContext<'_>,
    ) -> Result<String> {
        let detail = self
            .provision(ctx)
            .await
            .map_err(|e| RuntimeError::ToolkitFailed {
                reason: e.to_string(),
            })?;
        Ok(detail)
    }
}

/// Point every plain `deb https://` line at `keyring`
pub fn signed_repo_list(list: &str, keyring: &Path) -> String {
    let replacement = format!("$1 [signed-by={}] $2", keyring.display());
    UNSIGNED_DEB_LINE
        .replace_all(list, replacement.as_str())
        .into_owned()
}

// ---------------------------------------------------------------------------
// Compose helper
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposeState {
    pub present: bool,
}

/// Pinned `docker-compose` binary for setups that still call it directly
#[derive(Debug, Default)]
pub struct ComposeHelperStep;

impl ComposeHelperStep {
    pub fn new() -> Self {
        Self
    }

    async fn download(&self, ctx: &RunContext<'_>) -> Result<()> {
        let compose = &ctx.config.compose;
        let url = compose.download_url(std::env::consts::ARCH);
        info!("⬇️  Downloading docker-compose {}", compose.version);
        if let Some(parent) = compose.install_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        ctx.fetcher.download(&url, &compose.install_path).await?;
        set_executable(&compose.install_path).await?;
        Ok(())
    }
}

#[async_trait]
impl ProvisioningStep for ComposeHelperStep {
    type State = ComposeState;

    fn id(&self) -> &'static str {
        "compose"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Advisory
    }

    async fn detect(&self, ctx: &mut RunContext<'_>) -> Result<ComposeState> {
        Ok(ComposeState {
            present: ctx.config.compose.install_path.exists(),
        })
    }

    fn decide(&self, state: &ComposeState, ctx: &RunContext<'_>) -> Result<Decision> {
        Ok(if state.present {
            Decision::Skip(format!("already at {}", ctx.config.compose.install_path.display()))
        } else {
            Decision::Install
        })
    }

    async fn apply(
        &self,
        _decision: &Decision,
        _state: &ComposeState,
        ctx: &mut RunContext<'_>,
    ) -> Result<String> {
        self.download(ctx).await.map_err(|e| RuntimeError::HelperFailed {
            reason: e.to_string(),
        })?;
        Ok(format!(
            "installed {} at {}",
            ctx.config.compose.version,
            ctx.config.compose.install_path.display()
        ))
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionConfig;
    use crate::error::ProvisionError;
    use crate::fakes::{Fallback, MemoryFetcher, Reply, ScriptedOperator, ScriptedRunner};
    use crate::report::{RunReport, StepStatus};
    use crate::step::converge;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const DOCKER_INFO: &str = "Server:\n Containers: 0\n Runtimes: io.containerd.runc.v2 nvidia runc\n Default Runtime: nvidia\n";
    const DOCKER_INFO_PLAIN: &str = "Server:\n Runtimes: io.containerd.runc.v2 runc\n Default Runtime: runc\n";
    const REPO_LIST: &str = "deb https://nvidia.github.io/libnvidia-container/stable/deb/$(ARCH) /\n\
                             #deb https://nvidia.github.io/libnvidia-container/experimental/deb/$(ARCH) /\n";

    fn config(dir: &TempDir) -> ProvisionConfig {
        let root = dir.path();
        let mut config = ProvisionConfig::default();
        config.docker.install_script_path = root.join("get-docker.sh");
        config.docker.daemon_config_path = root.join("etc/docker/daemon.json");
        config.toolkit.keyring_path = root.join("keyrings/nvidia-container-toolkit-keyring.gpg");
        config.toolkit.repo_list_path = root.join("sources.list.d/nvidia-container-toolkit.list");
        config.compose.install_path = root.join("bin/docker-compose");
        config
    }

    async fn run<S: ProvisioningStep>(
        step: &S,
        runner: &ScriptedRunner,
        operator: &ScriptedOperator,
        fetcher: &MemoryFetcher,
        config: &ProvisionConfig,
    ) -> (Result<StepStatus>, RunReport) {
        let mut ctx = RunContext::new(runner, operator, fetcher, config).unwrap();
        let mut report = RunReport::new();
        let status = converge(step, &mut ctx, &mut report).await;
        (status, report)
    }

    #[tokio::test]
    async fn installed_engine_is_skipped() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runner = ScriptedRunner::new().respond("docker --version", "Docker version 27.3.1, build ce12230\n");
        let (status, report) = run(
            &EngineStep::new(),
            &runner,
            &ScriptedOperator::accept_all(),
            &MemoryFetcher::new(),
            &config,
        )
        .await;

        assert_eq!(status.unwrap(), StepStatus::Skipped);
        assert_eq!(report.steps[0].detail, "Docker 27.3.1 already installed");
        assert!(!runner.ran("sh "));
    }

    #[tokio::test]
    async fn missing_engine_is_installed_and_enabled() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runner = ScriptedRunner::new().sequence(
            "docker --version",
            vec![Reply::Missing, Reply::ok("Docker version 27.3.1, build ce12230")],
        );
        let fetcher = MemoryFetcher::new();
        let (status, _) = run(&EngineStep::new(), &runner, &ScriptedOperator::accept_all(), &fetcher, &config).await;

        assert_eq!(status.unwrap(), StepStatus::Applied);
        assert!(config.docker.install_script_path.exists());
        assert_eq!(fetcher.requested(), vec!["https://get.docker.com".to_string()]);
        let install = runner.position("sh ").unwrap();
        let enable = runner.position("systemctl enable --now docker").unwrap();
        assert!(install < enable);
    }

    #[tokio::test]
    async fn engine_install_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runner = ScriptedRunner::new().missing("docker --version");
        let fetcher = MemoryFetcher::new().failing("get.docker.com");
        let (status, report) = run(&EngineStep::new(), &runner, &ScriptedOperator::accept_all(), &fetcher, &config).await;

        let err = status.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, ProvisionError::Runtime(RuntimeError::EngineInstallFailed { .. })));
        assert_eq!(report.status_of("docker-engine"), Some(StepStatus::Failed));
    }

    #[tokio::test]
    async fn failed_start_resets_configuration() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(config.docker.daemon_config_path.parent().unwrap()).unwrap();
        std::fs::write(&config.docker.daemon_config_path, "{ broken").unwrap();
        let runner = ScriptedRunner::new().reply(
            "systemctl status docker",
            Reply::Exit {
                code: 3,
                stdout: "× docker.service - Docker Application Container Engine\n\
                         systemd[1]: Failed to start Docker Application Container Engine.\n"
                    .to_string(),
                stderr: String::new(),
            },
        );
        let (status, _) = run(
            &EngineRepairStep::new(),
            &runner,
            &ScriptedOperator::accept_all(),
            &MemoryFetcher::new(),
            &config,
        )
        .await;

        assert_eq!(status.unwrap(), StepStatus::Applied);
        assert!(!config.docker.daemon_config_path.exists());
        assert!(runner.position("systemctl stop docker").unwrap() < runner.position("systemctl restart docker").unwrap());
    }

    #[tokio::test]
    async fn healthy_engine_needs_no_repair() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runner = ScriptedRunner::new().respond("systemctl status docker", "Active: active (running)");
        let (status, _) = run(
            &EngineRepairStep::new(),
            &runner,
            &ScriptedOperator::accept_all(),
            &MemoryFetcher::new(),
            &config,
        )
        .await;

        assert_eq!(status.unwrap(), StepStatus::Skipped);
        assert!(!runner.ran("systemctl stop"));
    }

    #[tokio::test]
    async fn failed_repair_restart_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runner = ScriptedRunner::new()
            .respond("systemctl status docker", "Failed to start Docker Application Container Engine.")
            .fail("systemctl restart docker", "Job for docker.service failed");
        let (status, _) = run(
            &EngineRepairStep::new(),
            &runner,
            &ScriptedOperator::accept_all(),
            &MemoryFetcher::new(),
            &config,
        )
        .await;

        assert!(status.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn toolkit_is_provisioned_when_runtime_missing() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runner = ScriptedRunner::new()
            .respond("dpkg-query", "install ok installed")
            .respond("docker info", DOCKER_INFO_PLAIN)
            .respond("nvidia-ctk --version", "NVIDIA Container Toolkit CLI version 1.16.2\n");
        let fetcher = MemoryFetcher::new().with_body(&config.toolkit.repo_list_url, REPO_LIST);
        let (status, report) = run(&GpuRuntimeStep::new(), &runner, &ScriptedOperator::accept_all(), &fetcher, &config).await;

        assert_eq!(status.unwrap(), StepStatus::Applied);
        assert!(report.steps[0].detail.contains("1.16.2"));

        let list = std::fs::read_to_string(&config.toolkit.repo_list_path).unwrap();
        assert!(list.starts_with(&format!(
            "deb [signed-by={}] https://",
            config.toolkit.keyring_path.display()
        )));

        let daemon = std::fs::read_to_string(&config.docker.daemon_config_path).unwrap();
        assert!(daemon.contains("\"default-runtime\": \"nvidia\""));

        let commands = runner.commands();
        let order: Vec<usize> = [
            "gpg --dearmor",
            "apt-get update",
            "apt-get install -y nvidia-container-toolkit",
            "nvidia-ctk runtime configure --runtime=docker --set-as-default",
            "systemctl restart docker",
        ]
        .iter()
        .map(|prefix| commands.iter().position(|c| c.starts_with(prefix)).unwrap())
        .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]), "unexpected order: {:?}", commands);
        assert_eq!(runner.count("apt-get update"), 1);
    }

    #[tokio::test]
    async fn registered_runtime_is_skipped_unless_forced() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runner = ScriptedRunner::new()
            .respond("dpkg-query", "install ok installed")
            .respond("docker info", DOCKER_INFO);

        let operator = ScriptedOperator::with_fallback(Fallback::Defaults);
        let (status, _) = run(&GpuRuntimeStep::new(), &runner, &operator, &MemoryFetcher::new(), &config).await;
        assert_eq!(status.unwrap(), StepStatus::Skipped);
        assert!(operator.was_asked("Force an update"));
        assert!(!runner.ran("apt-get"));

        let forced = ScriptedOperator::accept_all();
        let (status, _) = run(&GpuRuntimeStep::new(), &runner, &forced, &MemoryFetcher::new(), &config).await;
        assert_eq!(status.unwrap(), StepStatus::Applied);
        assert!(runner.ran("apt-get install -y nvidia-container-toolkit"));
    }

    #[tokio::test]
    async fn forced_update_twice_leaves_identical_daemon_config() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(config.docker.daemon_config_path.parent().unwrap()).unwrap();
        std::fs::write(&config.docker.daemon_config_path, r#"{"debug": true}"#).unwrap();
        let runner = ScriptedRunner::new()
            .respond("dpkg-query", "install ok installed")
            .respond("docker info", DOCKER_INFO);
        let fetcher = MemoryFetcher::new().with_body(&config.toolkit.repo_list_url, REPO_LIST);
        let operator = ScriptedOperator::accept_all();

        let mut contents = Vec::new();
        for _ in 0..2 {
            let (status, _) = run(&GpuRuntimeStep::new(), &runner, &operator, &fetcher, &config).await;
            assert_eq!(status.unwrap(), StepStatus::Applied);
            contents.push(std::fs::read_to_string(&config.docker.daemon_config_path).unwrap());
        }

        assert_eq!(contents[0], contents[1]);
        assert_eq!(contents[0], DaemonConfig::default().render().unwrap());
        assert_eq!(runner.count("systemctl restart docker"), 2);
        assert_eq!(runner.count("nvidia-ctk runtime configure"), 2);
    }

    #[tokio::test]
    async fn toolkit_failure_is_advisory() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runner = ScriptedRunner::new().respond("docker info", DOCKER_INFO_PLAIN);
        let fetcher = MemoryFetcher::new().failing("libnvidia-container");
        let (status, report) = run(&GpuRuntimeStep::new(), &runner, &ScriptedOperator::accept_all(), &fetcher, &config).await;

        assert_eq!(status.unwrap(), StepStatus::Failed);
        assert!(report.steps[0].detail.contains("NVIDIA Container Toolkit setup failed"));
        assert!(!runner.ran("apt-get install"));
    }

    #[test]
    fn repo_list_lines_gain_signed_by() {
        let signed = signed_repo_list(REPO_LIST, Path::new("/usr/share/keyrings/k.gpg"));
        let lines: Vec<&str> = signed.lines().collect();
        assert_eq!(
            lines[0],
            "deb [signed-by=/usr/share/keyrings/k.gpg] https://nvidia.github.io/libnvidia-container/stable/deb/$(ARCH) /"
        );
        assert!(lines[1].starts_with("#deb https://"));
    }

    #[tokio::test]
    async fn compose_downloaded_once_and_executable() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runner = ScriptedRunner::new();
        let fetcher = MemoryFetcher::new();

        let (status, _) = run(&ComposeHelperStep::new(), &runner, &ScriptedOperator::accept_all(), &fetcher, &config).await;
        assert_eq!(status.unwrap(), StepStatus::Applied);
        assert!(fetcher.requested()[0].contains("/v2.29.7/docker-compose-linux-"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&config.compose.install_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        let (status, _) = run(&ComposeHelperStep::new(), &runner, &ScriptedOperator::accept_all(), &fetcher, &config).await;
        assert_eq!(status.unwrap(), StepStatus::Skipped);
        assert_eq!(fetcher.requested().len(), 1);
    }

    #[tokio::test]
    async fn compose_failure_is_advisory() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let fetcher = MemoryFetcher::new().failing("docker/compose");
        let (status, _) = run(
            &ComposeHelperStep::new(),
            &ScriptedRunner::new(),
            &ScriptedOperator::accept_all(),
            &fetcher,
            &config,
        )
        .await;
        assert_eq!(status.unwrap(), StepStatus::Failed);
    }
}
