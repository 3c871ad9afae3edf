//! Scripted fakes for the host-facing ports (testing only)
//!
//! `ScriptedRunner`, `ScriptedOperator`, `MemoryFetcher` and `FixedIdentity`
//! let a whole provisioning run execute without touching the machine:
//! commands are matched by prefix against canned responses and every call is
//! recorded.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CommandError, Result};
use crate::exec::{CommandRunner, CommandSpec, RunOptions};
use crate::net::Fetcher;
use crate::operator::Operator;
use crate::preflight::Identity;
use crate::types::ExternalCommandResult;

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// Canned reply for a command
#[derive(Debug, Clone)]
pub enum Reply {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// The program could not be spawned (not installed)
    Missing,
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Reply::Exit {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn fail(code: i32, stderr: impl Into<String>) -> Self {
        Reply::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

#[derive(Debug)]
struct Rule {
    prefix: String,
    replies: VecDeque<Reply>,
}

/// Records every command and answers from prefix rules. Unmatched commands
/// succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(CommandSpec, RunOptions)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands starting with `prefix` succeed with `stdout`
    pub fn respond(self, prefix: &str, stdout: &str) -> Self {
        self.reply(prefix, Reply::ok(stdout))
    }

    /// Commands starting with `prefix` exit 1 with `stderr`
    pub fn fail(self, prefix: &str, stderr: &str) -> Self {
        self.reply(prefix, Reply::fail(1, stderr))
    }

    /// Commands starting with `prefix` cannot be spawned
    pub fn missing(self, prefix: &str) -> Self {
        self.reply(prefix, Reply::Missing)
    }

    pub fn reply(self, prefix: &str, reply: Reply) -> Self {
        self.sequence(prefix, vec![reply])
    }

    /// Successive calls consume `replies` in order; the last one repeats
    pub fn sequence(self, prefix: &str, replies: Vec<Reply>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                prefix: prefix.to_string(),
                replies: replies.into(),
            });
        }
        self
    }

    /// Display strings of every command run, in order
    pub fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(|(spec, _)| spec.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(|(spec, _)| spec.clone()).collect())
            .unwrap_or_default()
    }

    pub fn options_for(&self, prefix: &str) -> Option<RunOptions> {
        self.calls.lock().ok().and_then(|calls| {
            calls
                .iter()
                .find(|(spec, _)| spec.to_string().starts_with(prefix))
                .map(|(_, options)| options.clone())
        })
    }

    /// How many commands started with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    /// Index of the first command starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.starts_with(prefix))
    }

    fn next_reply(&self, display: &str) -> Reply {
        let Ok(mut rules) = self.rules.lock() else {
            return Reply::ok("");
        };
        // Longest prefix wins; among equals the latest registration wins.
        let best = rules
            .iter_mut()
            .enumerate()
            .filter(|(_, rule)| display.starts_with(&rule.prefix))
            .max_by_key(|(i, rule)| (rule.prefix.len(), *i))
            .map(|(_, rule)| rule);

        match best {
            Some(rule) if rule.replies.len() > 1 => rule.replies.pop_front().unwrap_or(Reply::ok("")),
            Some(rule) => rule.replies.front().cloned().unwrap_or(Reply::ok("")),
            None => Reply::ok(""),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        options: &RunOptions,
    ) -> std::result::Result<ExternalCommandResult, CommandError> {
        let rendered = command.to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((command.clone(), options.clone()));
        }

        match self.next_reply(&rendered) {
            Reply::Exit {
                code,
                stdout,
                stderr,
            } => Ok(ExternalCommandResult {
                command: rendered,
                exit_code: Some(code),
                stdout,
                stderr,
                duration: Duration::from_millis(1),
            }),
            Reply::Missing => Err(CommandError::Spawn {
                command: rendered,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedOperator
// ---------------------------------------------------------------------------

/// What an unscripted prompt answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fallback {
    /// `yes` to every question, default to every text input
    #[default]
    AcceptAll,
    /// The prompt's own default
    Defaults,
    /// `no` to every question
    DeclineAll,
}

/// Answers prompts by substring match and records every prompt shown
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    confirms: Vec<(String, bool)>,
    inputs: Vec<(String, String)>,
    fallback: Fallback,
    asked: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: Fallback) -> Self {
        Self {
            fallback,
            ..Self::default()
        }
    }

    /// Questions containing `needle` answer `value`
    pub fn answer(mut self, needle: &str, value: bool) -> Self {
        self.confirms.push((needle.to_string(), value));
        self
    }

    /// Text inputs containing `needle` answer `value`
    pub fn text(mut self, needle: &str, value: &str) -> Self {
        self.inputs.push((needle.to_string(), value.to_string()));
        self
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn was_asked(&self, needle: &str) -> bool {
        self.asked().iter().any(|p| p.contains(needle))
    }

    fn record(&self, prompt: &str) {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(prompt.to_string());
        }
    }
}

impl Operator for ScriptedOperator {
    fn confirm(&self, prompt: &str, default: bool) -> bool {
        self.record(prompt);
        if let Some((_, value)) = self.confirms.iter().rev().find(|(n, _)| prompt.contains(n)) {
            return *value;
        }
        match self.fallback {
            Fallback::AcceptAll => true,
            Fallback::Defaults => default,
            Fallback::DeclineAll => false,
        }
    }

    fn input(&self, prompt: &str, default: &str) -> String {
        self.record(prompt);
        self.inputs
            .iter()
            .rev()
            .find(|(n, _)| prompt.contains(n))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| default.to_string())
    }
}

// ---------------------------------------------------------------------------
// FixedIdentity
// ---------------------------------------------------------------------------

/// Reports a fixed effective uid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedIdentity(pub u32);

impl Identity for FixedIdentity {
    fn effective_uid(&self) -> u32 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// MemoryFetcher
// ---------------------------------------------------------------------------

/// Serves canned bodies and writes downloads to disk
#[derive(Debug)]
pub struct MemoryFetcher {
    reachable: bool,
    bodies: HashMap<String, String>,
    failing: Vec<String>,
    requested: Mutex<Vec<String>>,
}

impl Default for MemoryFetcher {
    fn default() -> Self {
        Self {
            reachable: true,
            bodies: HashMap::new(),
            failing: Vec::new(),
            requested: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offline() -> Self {
        Self {
            reachable: false,
            ..Self::default()
        }
    }

    pub fn with_body(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), body.to_string());
        self
    }

    /// Requests for URLs containing `needle` fail
    pub fn failing(mut self, needle: &str) -> Self {
        self.failing.push(needle.to_string());
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn body_for(&self, url: &str) -> Result<String> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(url.to_string());
        }
        if !self.reachable || self.failing.iter().any(|n| url.contains(n)) {
            return Err(anyhow::anyhow!("connection refused: {}", url).into());
        }
        Ok(self
            .bodies
            .get(url)
            .cloned()
            .unwrap_or_else(|| format!("# fetched from {}\n", url)))
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn reachable(&self, _url: &str) -> bool {
        self.reachable
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.body_for(url)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let body = self.body_for(url)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &body).await?;
        Ok(body.len() as u64)
    }
}
