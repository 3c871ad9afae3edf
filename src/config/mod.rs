use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::types::VersionSpec;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Everything a provisioning run needs to know about the host and the
/// collaborators it talks to. Every field has a default, so an empty TOML
/// file is a valid configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Take the default answer for every prompt
    pub non_interactive: bool,
    /// Continue on an unsupported OS without asking
    pub allow_unsupported_os: bool,
    /// Upper bound for any single external command, 0 disables
    pub command_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub preflight: PreflightConfig,
    pub driver: DriverConfig,
    pub docker: DockerConfig,
    pub toolkit: ToolkitConfig,
    pub compose: ComposeConfig,
    pub patch: PatchConfig,
    pub probe: ProbeConfig,
    pub signatures: SignatureConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PreflightConfig {
    /// Matched case-insensitively against `lspci` output
    pub vendor: String,
    pub os_release_path: PathBuf,
    pub os_id: String,
    pub supported_os_versions: Vec<String>,
    pub connectivity_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    /// Used when `ubuntu-drivers` recommends nothing
    pub fallback_version: String,
    pub prerequisites: Vec<String>,
    pub kernel_module: String,
    /// apt regex handed to `apt-get purge` during mismatch repair
    pub purge_pattern: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DockerConfig {
    pub service: String,
    pub install_script_url: String,
    pub install_script_path: PathBuf,
    pub daemon_config_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ToolkitConfig {
    pub gpg_key_url: String,
    pub repo_list_url: String,
    pub keyring_path: PathBuf,
    pub repo_list_path: PathBuf,
    pub packages: Vec<String>,
    /// Package whose presence marks the toolkit as installed
    pub marker_package: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ComposeConfig {
    pub version: String,
    pub install_path: PathBuf,
    /// `{version}` and `{arch}` are substituted
    pub url_template: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PatchConfig {
    pub repo_url: String,
    pub work_dir: PathBuf,
    pub scripts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub cuda_image: String,
    pub ffmpeg_image: String,
    /// Offer the disposable container checks at the end of the run
    pub container_checks: bool,
}

/// Output fragments the run relies on to recognise tool states. Kept here so
/// a changed upstream message is a config edit, not a code change.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SignatureConfig {
    pub version_mismatch: String,
    pub docker_failed_start: String,
    /// Regex over `docker info`
    pub nvidia_runtime: String,
    /// Regex over `ubuntu-drivers devices`, capture 1 is the version
    pub recommended_driver: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            non_interactive: false,
            allow_unsupported_os: false,
            command_timeout_secs: 0,
            http_timeout_secs: 30,
            preflight: PreflightConfig::default(),
            driver: DriverConfig::default(),
            docker: DockerConfig::default(),
            toolkit: ToolkitConfig::default(),
            compose: ComposeConfig::default(),
            patch: PatchConfig::default(),
            probe: ProbeConfig::default(),
            signatures: SignatureConfig::default(),
        }
    }
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            vendor: "nvidia".to_string(),
            os_release_path: PathBuf::from("/etc/os-release"),
            os_id: "ubuntu".to_string(),
            supported_os_versions: vec!["22.04".to_string(), "24.04".to_string()],
            connectivity_url: "https://download.docker.com".to_string(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            fallback_version: "550".to_string(),
            prerequisites: vec![
                "build-essential".to_string(),
                "dkms".to_string(),
                "ubuntu-drivers-common".to_string(),
            ],
            kernel_module: "nvidia".to_string(),
            purge_pattern: "^nvidia-.*".to_string(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            service: "docker".to_string(),
            install_script_url: "https://get.docker.com".to_string(),
            install_script_path: PathBuf::from("/tmp/get-docker.sh"),
            daemon_config_path: PathBuf::from("/etc/docker/daemon.json"),
        }
    }
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            gpg_key_url: "https://nvidia.github.io/libnvidia-container/gpgkey".to_string(),
            repo_list_url:
                "https://nvidia.github.io/libnvidia-container/stable/deb/nvidia-container-toolkit.list"
                    .to_string(),
            keyring_path: PathBuf::from(
                "/usr/share/keyrings/nvidia-container-toolkit-keyring.gpg",
            ),
            repo_list_path: PathBuf::from("/etc/apt/sources.list.d/nvidia-container-toolkit.list"),
            packages: vec!["nvidia-container-toolkit".to_string()],
            marker_package: "nvidia-container-toolkit".to_string(),
        }
    }
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            version: "v2.29.7".to_string(),
            install_path: PathBuf::from("/usr/local/bin/docker-compose"),
            url_template:
                "https://github.com/docker/compose/releases/download/{version}/docker-compose-linux-{arch}"
                    .to_string(),
        }
    }
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            repo_url: "https://github.com/keylase/nvidia-patch.git".to_string(),
            work_dir: PathBuf::from("/opt/nvidia-patch"),
            scripts: vec!["patch.sh".to_string(), "patch-fbc.sh".to_string()],
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            cuda_image: "nvidia/cuda:12.4.1-base-ubuntu22.04".to_string(),
            ffmpeg_image: "jrottenberg/ffmpeg:4.4-nvidia".to_string(),
            container_checks: true,
        }
    }
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            version_mismatch: "version mismatch".to_string(),
            docker_failed_start: "Failed to start Docker".to_string(),
            nvidia_runtime: r"(?m)^\s*Runtimes:.*\bnvidia\b".to_string(),
            recommended_driver: r"nvidia-driver-(\d+(?:-[a-z]+)*)\s[^\n]*recommended".to_string(),
        }
    }
}

impl ProvisionConfig {
    /// Load from `path`, or from the per-user default location when it
    /// exists, or fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound {
                        path: path.display().to_string(),
                    }
                    .into());
                }
                Self::from_file(path)?
            }
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        info!("📄 Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `$XDG_CONFIG_HOME/nvprep/config.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nvprep").join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<()> {
        debug!("Validating configuration");

        if !VersionSpec::is_branch(&self.driver.fallback_version) {
            return Err(invalid(format!(
                "driver.fallback_version must be a driver branch such as 550 or 570-open, got '{}'",
                self.driver.fallback_version
            )));
        }

        if self.preflight.vendor.trim().is_empty() {
            return Err(invalid("preflight.vendor cannot be empty"));
        }

        if self.preflight.supported_os_versions.is_empty() {
            return Err(invalid("preflight.supported_os_versions cannot be empty"));
        }

        if self.toolkit.packages.is_empty() {
            return Err(invalid("toolkit.packages cannot be empty"));
        }

        if !self.compose.url_template.contains("{version}") {
            return Err(invalid("compose.url_template must contain {version}"));
        }

        for (name, pattern) in [
            ("signatures.nvidia_runtime", &self.signatures.nvidia_runtime),
            ("signatures.recommended_driver", &self.signatures.recommended_driver),
        ] {
            regex::Regex::new(pattern)
                .map_err(|e| invalid(format!("{} is not a valid regex: {}", name, e)))?;
        }

        Ok(())
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}

impl ComposeConfig {
    pub fn download_url(&self, arch: &str) -> String {
        self.url_template
            .replace("{version}", &self.version)
            .replace("{arch}", arch)
    }
}

fn invalid(reason: impl Into<String>) -> crate::error::ProvisionError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
    .into()
}
