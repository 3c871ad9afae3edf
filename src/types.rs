use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

static DRIVER_BRANCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{3}(-[a-z]+)*$").expect("static regex"));

/// Outcome of one external process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommandResult {
    pub command: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExternalCommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout and stderr joined, for tools that print diagnostics to either
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Short failure description for error messages
    pub fn failure_reason(&self) -> String {
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let detail = self.stderr.trim();
        if detail.is_empty() {
            format!("`{}` exited with {}", self.command, code)
        } else {
            format!("`{}` exited with {}: {}", self.command, code, detail)
        }
    }
}

/// Where a resolved driver version came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionSource {
    Detected,
    Operator,
    Fallback,
}

/// Driver version resolved once per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSpec {
    pub version: String,
    pub source: VersionSource,
}

impl VersionSpec {
    pub fn new(version: impl Into<String>, source: VersionSource) -> Self {
        Self {
            version: version.into(),
            source,
        }
    }

    pub fn package_name(&self) -> String {
        format!("nvidia-driver-{}", self.version)
    }

    /// `550`, `570-open`, `535-server-open`: the part after `nvidia-driver-`
    pub fn is_branch(version: &str) -> bool {
        DRIVER_BRANCH.is_match(version)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            VersionSource::Detected => "detected",
            VersionSource::Operator => "operator",
            VersionSource::Fallback => "fallback",
        };
        write!(f, "{} ({})", self.version, source)
    }
}
