//! Recognisers for external tool output.
//!
//! All matching against human-readable tool output lives here so a changed
//! upstream message only touches this module (or the `[signatures]` config
//! section), never the provisioning steps.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::config::SignatureConfig;
use crate::error::{ConfigError, Result};

static DOCKER_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Docker version (\d+\.\d+(?:\.\d+)?)").expect("static regex"));

static TOOLKIT_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"version (\d+\.\d+\.\d+)").expect("static regex"));

/// Compiled output signatures for one run
#[derive(Debug, Clone)]
pub struct Signatures {
    version_mismatch: String,
    docker_failed_start: String,
    nvidia_runtime: Regex,
    recommended_driver: Regex,
}

impl Signatures {
    pub fn from_config(config: &SignatureConfig) -> Result<Self> {
        let compile = |name: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| ConfigError::Invalid {
                reason: format!("signature {} does not compile: {}", name, e),
            })
        };

        Ok(Self {
            version_mismatch: config.version_mismatch.to_lowercase(),
            docker_failed_start: config.docker_failed_start.to_lowercase(),
            nvidia_runtime: compile("nvidia_runtime", &config.nvidia_runtime)?,
            recommended_driver: compile("recommended_driver", &config.recommended_driver)?,
        })
    }

    /// `nvidia-smi` reports the kernel module and userspace library disagree
    pub fn is_version_mismatch(&self, output: &str) -> bool {
        output.to_lowercase().contains(&self.version_mismatch)
    }

    /// `systemctl status docker` shows the daemon refusing to start
    pub fn is_docker_failed_start(&self, output: &str) -> bool {
        output.to_lowercase().contains(&self.docker_failed_start)
    }

    /// `docker info` advertises the nvidia runtime
    pub fn lists_nvidia_runtime(&self, docker_info: &str) -> bool {
        self.nvidia_runtime.is_match(docker_info)
    }

    /// Recommended driver branch from `ubuntu-drivers devices`
    pub fn recommended_driver(&self, devices_output: &str) -> Option<String> {
        self.recommended_driver
            .captures(devices_output)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl Default for Signatures {
    fn default() -> Self {
        Self::from_config(&SignatureConfig::default()).expect("default signatures compile")
    }
}

/// Version from `docker --version`
pub fn docker_version(output: &str) -> Option<String> {
    DOCKER_VERSION
        .captures(output)
        .map(|caps| caps[1].to_string())
}

/// Version from `nvidia-ctk --version`
pub fn toolkit_version(output: &str) -> Option<String> {
    TOOLKIT_VERSION
        .captures(output)
        .map(|caps| caps[1].to_string())
}

/// The fields of `/etc/os-release` the preflight check cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub version_id: String,
    pub pretty_name: String,
}

pub fn parse_os_release(content: &str) -> OsRelease {
    let fields: HashMap<&str, String> = content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"').to_string()))
        .collect();

    OsRelease {
        id: fields.get("ID").cloned().unwrap_or_default(),
        version_id: fields.get("VERSION_ID").cloned().unwrap_or_default(),
        pretty_name: fields.get("PRETTY_NAME").cloned().unwrap_or_default(),
    }
}
