//! Operator decision port.
//!
//! Every yes/no or free-text question the run asks goes through [`Operator`].
//! Prompts block the run until answered; there is no timeout.

use std::io::{self, BufRead, BufReader, Write};
use std::sync::Mutex;
use tracing::info;

#[cfg_attr(test, mockall::automock)]
pub trait Operator: Send + Sync {
    /// Ask a yes/no question. `default` is the answer an empty reply selects.
    fn confirm(&self, prompt: &str, default: bool) -> bool;

    /// Ask for free text; an empty reply selects `default`.
    fn input(&self, prompt: &str, default: &str) -> String;
}

/// Reads answers from a line-oriented reader (stdin in production)
pub struct InteractiveOperator {
    input: Mutex<Box<dyn BufRead + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl InteractiveOperator {
    pub fn stdio() -> Self {
        Self::with_io(BufReader::new(io::stdin()), io::stdout())
    }

    pub fn with_io(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Mutex::new(Box::new(input)),
            output: Mutex::new(Box::new(output)),
        }
    }

    /// One prompt/answer exchange. `None` on EOF or a broken reader.
    fn ask(&self, prompt: &str) -> Option<String> {
        if let Ok(mut out) = self.output.lock() {
            let _ = write!(out, "{} ", prompt);
            let _ = out.flush();
        }

        let mut line = String::new();
        let mut input = self.input.lock().ok()?;
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl Operator for InteractiveOperator {
    fn confirm(&self, prompt: &str, default: bool) -> bool {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let Some(answer) = self.ask(&format!("{} {}", prompt, hint)) else {
                return default;
            };
            match answer.to_ascii_lowercase().as_str() {
                "" => return default,
                "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => {
                    if let Ok(mut out) = self.output.lock() {
                        let _ = writeln!(out, "Please answer 'y' or 'n'.");
                    }
                }
            }
        }
    }

    fn input(&self, prompt: &str, default: &str) -> String {
        match self.ask(&format!("{} [{}]:", prompt, default)) {
            Some(answer) if !answer.is_empty() => answer,
            _ => default.to_string(),
        }
    }
}

/// Non-interactive mode: every question takes its default answer
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoAccept;

impl Operator for AutoAccept {
    fn confirm(&self, prompt: &str, default: bool) -> bool {
        info!("🤖 {} → {}", prompt, if default { "yes" } else { "no" });
        default
    }

    fn input(&self, prompt: &str, default: &str) -> String {
        info!("🤖 {} → {}", prompt, default);
        default.to_string()
    }
}
