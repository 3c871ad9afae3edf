//! External command execution.
//!
//! Every interaction with the host (apt, systemctl, nvidia-smi, docker, ...)
//! goes through [`CommandRunner`] so provisioning logic can be exercised
//! against a scripted fake. Commands are argv vectors and never pass through a
//! shell unless built with [`CommandSpec::shell`].

use async_trait::async_trait;
use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::CommandError;
use crate::types::ExternalCommandResult;

pub mod progress;

use progress::Spinner;

const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(120);

/// One external command: program, argument vector and extra environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    shell_line: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            shell_line: None,
        }
    }

    /// A fixed shell line run through `sh -c`. Only for strings the tool
    /// itself assembles; never interpolate operator input here.
    pub fn shell(line: impl Into<String>) -> Self {
        let line = line.into();
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), line.clone()],
            env: Vec::new(),
            shell_line: Some(line),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn is_shell(&self) -> bool {
        self.shell_line.is_some()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = &self.shell_line {
            return f.write_str(line);
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Per-invocation execution options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Keep the child's output out of the console log
    pub suppress_output: bool,
    /// Spinner label shown while the process runs (interactive terminals only)
    pub progress: Option<String>,
    pub timeout: Option<Duration>,
    pub cwd: Option<PathBuf>,
}

impl RunOptions {
    /// Captured but silent; used for detection queries
    pub fn quiet() -> Self {
        Self {
            suppress_output: true,
            ..Self::default()
        }
    }

    /// Silent with a spinner; used for long installs
    pub fn progress(label: impl Into<String>) -> Self {
        Self {
            suppress_output: true,
            progress: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

/// Executes external commands. Never retries.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion. A non-zero exit is an `Ok` result with a
    /// failing status; only spawn failures and timeouts are errors.
    async fn run(
        &self,
        command: &CommandSpec,
        options: &RunOptions,
    ) -> Result<ExternalCommandResult, CommandError>;

    /// Like [`CommandRunner::run`] but a non-zero exit becomes
    /// [`CommandError::Failed`].
    async fn run_ok(
        &self,
        command: &CommandSpec,
        options: &RunOptions,
    ) -> Result<ExternalCommandResult, CommandError> {
        let result = self.run(command, options).await?;
        if result.success() {
            Ok(result)
        } else {
            Err(CommandError::Failed {
                command: result.command.clone(),
                code: result
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: result.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands on the local host with `tokio::process`
#[derive(Debug, Clone)]
pub struct SystemRunner {
    interactive: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self {
            interactive: std::io::stderr().is_terminal(),
        }
    }

    /// Force the spinner on or off regardless of the attached terminal
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        options: &RunOptions,
    ) -> Result<ExternalCommandResult, CommandError> {
        let rendered = command.to_string();
        debug!("$ {}", rendered);

        let start = Instant::now();
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &options.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: rendered.clone(),
            source,
        })?;

        let stdout_task = tokio::spawn(read_to_string(child.stdout.take()));
        let stderr_task = tokio::spawn(read_to_string(child.stderr.take()));

        let mut spinner = match (&options.progress, self.interactive) {
            (Some(label), true) => Some(Spinner::new(label.clone())),
            _ => None,
        };

        let waited = match options.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, wait_with_progress(&mut child, spinner.as_mut()))
                    .await
                {
                    Ok(status) => status,
                    Err(_) => {
                        let _ = child.kill().await;
                        if let Some(spinner) = &spinner {
                            spinner.finish(false);
                        }
                        return Err(CommandError::TimedOut {
                            command: rendered,
                            secs: limit.as_secs(),
                        });
                    }
                }
            }
            None => wait_with_progress(&mut child, spinner.as_mut()).await,
        };

        let status = waited.map_err(|source| CommandError::Spawn {
            command: rendered.clone(),
            source,
        })?;

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if !options.suppress_output {
            for line in stdout.lines().chain(stderr.lines()) {
                info!("  │ {}", line);
            }
        }

        let result = ExternalCommandResult {
            command: rendered,
            exit_code: status.code(),
            stdout,
            stderr,
            duration: start.elapsed(),
        };
        debug!(
            "  → exit {:?} in {:.1}s",
            result.exit_code,
            result.duration.as_secs_f64()
        );
        Ok(result)
    }
}

async fn wait_with_progress(
    child: &mut Child,
    spinner: Option<&mut Spinner>,
) -> std::io::Result<ExitStatus> {
    let Some(spinner) = spinner else {
        return child.wait().await;
    };

    let mut tick = tokio::time::interval(PROGRESS_POLL_INTERVAL);
    loop {
        tick.tick().await;
        if let Some(status) = child.try_wait()? {
            spinner.finish(status.success());
            return Ok(status);
        }
        spinner.advance();
    }
}

async fn read_to_string<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}
