use thiserror::Error;

/// nvprep error types, split by the component that raised them
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Preflight check failed: {0}")]
    Preflight(#[from] PreflightError),

    #[error("Package installation error: {0}")]
    Install(#[from] InstallError),

    #[error("Driver provisioning error: {0}")]
    Driver(#[from] DriverError),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generic error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ProvisionError {
    /// Whether this error must halt the whole run regardless of which step
    /// raised it.
    pub fn is_fatal(&self) -> bool {
        match self {
            ProvisionError::Preflight(e) => e.is_fatal(),
            ProvisionError::Driver(e) => e.is_fatal(),
            ProvisionError::Runtime(e) => e.is_fatal(),
            ProvisionError::Config(_) => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("this tool must be run as root (effective uid is {uid})")]
    NotPrivileged { uid: u32 },

    #[error("no {vendor} GPU detected on the PCI bus")]
    HardwareMissing { vendor: String },

    #[error("{check} check declined by operator")]
    Declined { check: String },
}

impl PreflightError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PreflightError::Declined { .. })
    }
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("package index refresh failed: {stderr}")]
    RefreshFailed { stderr: String },

    #[error("failed to install {packages}: {stderr}")]
    InstallFailed { packages: String, stderr: String },

    #[error("failed to remove packages matching {pattern}: {stderr}")]
    PurgeFailed { pattern: String, stderr: String },
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("NVIDIA driver/library version mismatch must be fixed to continue")]
    RepairDeclined,

    #[error("driver repair failed during {stage}: {reason}")]
    RepairFailed { stage: String, reason: String },

    #[error("driver {version} installation failed: {reason}")]
    InstallFailed { version: String, reason: String },
}

impl DriverError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DriverError::InstallFailed { .. })
    }
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Docker installation failed: {reason}")]
    EngineInstallFailed { reason: String },

    #[error("Docker configuration repair failed: {reason}")]
    EngineRepairFailed { reason: String },

    #[error("NVIDIA Container Toolkit setup failed: {reason}")]
    ToolkitFailed { reason: String },

    #[error("compose helper download failed: {reason}")]
    HelperFailed { reason: String },
}

impl RuntimeError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeError::EngineInstallFailed { .. } | RuntimeError::EngineRepairFailed { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {secs}s")]
    TimedOut { command: String, secs: u64 },

    #[error("`{command}` exited with {code}: {stderr}")]
    Failed {
        command: String,
        code: String,
        stderr: String,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found at path: {path}")]
    NotFound { path: String },

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// Convenience type alias for nvprep results
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declined_soft_check_is_not_fatal() {
        let err: ProvisionError = PreflightError::Declined {
            check: "OS".into(),
        }
        .into();
        assert!(!err.is_fatal());

        let err: ProvisionError = PreflightError::HardwareMissing {
            vendor: "nvidia".into(),
        }
        .into();
        assert!(err.is_fatal());
    }

    #[test]
    fn driver_install_failure_is_advisory() {
        let err: ProvisionError = DriverError::InstallFailed {
            version: "550".into(),
            reason: "boom".into(),
        }
        .into();
        assert!(!err.is_fatal());
        assert!(ProvisionError::from(DriverError::RepairDeclined).is_fatal());
    }

    #[test]
    fn repair_declined_message() {
        let msg = DriverError::RepairDeclined.to_string();
        assert!(msg.contains("must be fixed to continue"));
    }
}
