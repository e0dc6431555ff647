//! pagediff CLI - Main Entry Point
//!
//! Records baseline screenshots, compares fresh captures against them and
//! approves candidates as the new baseline.
//!
//! Exit codes: 0 when the run passes, 1 when targets differ or fail,
//! 2 for setup errors (bad config, unreadable URL source, missing browser).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{approve, init, profiles, run, targets};
use pagediff_engine::RunMode;

const EXIT_FAILED: u8 = 1;
const EXIT_SETUP: u8 = 2;

/// pagediff - screenshot regression testing
#[derive(Parser)]
#[command(name = "pagediff")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (TOML); defaults apply when it does not exist
    #[arg(long, default_value = "pagediff.toml", env = "PAGEDIFF_CONFIG", global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture targets into the baseline store
    Record(run::RunArgs),

    /// Capture targets and diff them against the baseline
    Compare(run::RunArgs),

    /// Promote candidate images to baselines
    Approve(approve::ApproveArgs),

    /// List the targets a source yields, without capturing
    Targets(targets::TargetsArgs),

    /// List known viewport profiles
    Profiles,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

async fn dispatch(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Record(args) => run::execute(RunMode::Record, args, &cli.config, cli.format).await,
        Commands::Compare(args) => run::execute(RunMode::Compare, args, &cli.config, cli.format).await,
        Commands::Approve(args) => approve::execute(args, &cli.config, cli.format).await.map(|_| true),
        Commands::Targets(args) => targets::execute(args, &cli.config, cli.format).await.map(|_| true),
        Commands::Profiles => profiles::execute(&cli.config, cli.format).map(|_| true),
        Commands::Init { force } => init::execute(&cli.config, force).map(|_| true),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_FAILED),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(EXIT_SETUP)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_compare_flags() {
        let cli = Cli::try_parse_from([
            "pagediff",
            "--format",
            "json",
            "compare",
            "--urls",
            "urls.txt",
            "-p",
            "1920x1080",
            "-p",
            "ipad",
            "-j",
            "2",
            "--threshold",
            "0.2",
        ])
        .unwrap();

        assert_eq!(cli.format, output::OutputFormat::Json);
        match cli.command {
            Commands::Compare(args) => {
                assert_eq!(args.profiles, vec!["1920x1080", "ipad"]);
                assert_eq!(args.concurrency, Some(2));
                assert_eq!(args.threshold, Some(0.2));
                assert!(args.source.build().is_ok());
            }
            _ => panic!("expected compare"),
        }
    }

    #[test]
    fn test_sources_are_exclusive() {
        let result = Cli::try_parse_from([
            "pagediff", "record", "--urls", "a.txt", "--sitemap", "sitemap.xml",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_source_is_setup_error() {
        let cli = Cli::try_parse_from(["pagediff", "record"]).unwrap();
        match cli.command {
            Commands::Record(args) => assert!(args.source.build().is_err()),
            _ => panic!("expected record"),
        }
    }
}
