use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nvprep")]
#[command(about = "Provision NVIDIA drivers, Docker and the NVIDIA Container Toolkit on Ubuntu")]
#[command(version, long_about = None)]
pub struct Cli {
    /// Answer every prompt with its default (non-interactive mode)
    #[arg(short, long, env = "NVPREP_YES")]
    pub yes: bool,

    /// Configuration file path
    #[arg(short, long, env = "NVPREP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Continue on an untested OS release without asking
    #[arg(long, env = "NVPREP_ALLOW_UNSUPPORTED_OS")]
    pub allow_unsupported_os: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Print the final run report as JSON instead of a table
    #[arg(long)]
    pub report_json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from(["nvprep", "--yes", "--config", "/etc/nvprep.toml", "-v"]).unwrap();
        assert!(cli.yes);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/nvprep.toml")));
        assert!(!cli.json_logs);
    }
}
