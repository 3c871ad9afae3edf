use std::io;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// How console logging is set up for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    pub verbose: bool,
    pub json: bool,
}

impl LoggingConfig {
    /// `RUST_LOG` wins over the level picked from `verbose`
    pub fn filter(&self) -> EnvFilter {
        let level = if self.verbose { "debug" } else { "info" };
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Install the global subscriber. Logs go to stderr so the summary table
    /// on stdout stays clean.
    pub fn init(&self) -> anyhow::Result<()> {
        let registry = Registry::default().with(self.filter());

        if self.json {
            let json_layer = fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_writer(io::stderr);
            registry.with(json_layer).try_init()?;
        } else {
            let console_layer = fmt::layer()
                .with_target(false)
                .without_time()
                .compact()
                .with_ansi(true)
                .with_writer(io::stderr);
            registry.with(console_layer).try_init()?;
        }
        Ok(())
    }
}
