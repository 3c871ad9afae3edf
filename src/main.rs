mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use nvprep::exec::SystemRunner;
use nvprep::logging::LoggingConfig;
use nvprep::net::HttpFetcher;
use nvprep::operator::{AutoAccept, InteractiveOperator, Operator};
use nvprep::{Orchestrator, ProvisionConfig, RunOutcome};
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        verbose: cli.verbose,
        json: cli.json_logs,
    };
    if let Err(e) = logging.init() {
        eprintln!("failed to initialise logging: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = ProvisionConfig::load(cli.config.as_deref())?;
    config.non_interactive |= cli.yes;
    config.allow_unsupported_os |= cli.allow_unsupported_os;

    let operator: Box<dyn Operator> = if config.non_interactive {
        info!("🤖 Non-interactive mode: taking the default for every prompt");
        Box::new(AutoAccept)
    } else {
        Box::new(InteractiveOperator::stdio())
    };
    let runner = SystemRunner::new();
    let fetcher = HttpFetcher::new(config.http_timeout())?;

    let outcome = Orchestrator::new(&runner, operator.as_ref(), &fetcher, &config)
        .run()
        .await?;

    match outcome {
        RunOutcome::Cancelled { reason } => {
            info!("🛑 Cancelled ({}), nothing was changed", reason);
        }
        RunOutcome::Completed { report, reboot } => {
            if cli.report_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.print_summary();
            }
            if let Some(reboot) = reboot {
                reboot.execute(&runner).await?;
            }
        }
    }
    Ok(())
}
