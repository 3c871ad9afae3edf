//! Docker daemon configuration, rendered and written wholesale.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDefinition {
    pub path: String,
    #[serde(rename = "runtimeArgs")]
    pub runtime_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOptions {
    #[serde(rename = "max-size")]
    pub max_size: String,
    #[serde(rename = "max-file")]
    pub max_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    pub buildkit: bool,
}

/// `/etc/docker/daemon.json` with the NVIDIA runtime as default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DaemonConfig {
    pub default_runtime: String,
    pub runtimes: BTreeMap<String, RuntimeDefinition>,
    pub log_driver: String,
    pub log_opts: LogOptions,
    pub storage_driver: String,
    pub features: Features,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let mut runtimes = BTreeMap::new();
        runtimes.insert(
            "nvidia".to_string(),
            RuntimeDefinition {
                path: "nvidia-container-runtime".to_string(),
                runtime_args: Vec::new(),
            },
        );
        Self {
            default_runtime: "nvidia".to_string(),
            runtimes,
            log_driver: "json-file".to_string(),
            log_opts: LogOptions {
                max_size: "10m".to_string(),
                max_file: "3".to_string(),
            },
            storage_driver: "overlay2".to_string(),
            features: Features { buildkit: true },
        }
    }
}

impl DaemonConfig {
    pub fn render(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Write the rendered document if the file differs. Returns whether it
    /// was written. Prior content is replaced, never merged.
    pub async fn converge(&self, path: &Path) -> Result<bool> {
        let desired = self.render()?;
        match fs::read_to_string(path).await {
            Ok(current) if current == desired => {
                debug!("{} already up to date", path.display());
                return Ok(false);
            }
            Ok(_) => info!("📝 Replacing {}", path.display()),
            Err(_) => info!("📝 Writing {}", path.display()),
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, desired).await?;
        Ok(true)
    }
}
