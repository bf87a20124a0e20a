#![forbid(unsafe_code)]

mod client;
mod cmd;
mod offline;
mod output;

use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use std::env;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "rollup: bottom-up cost rollup for Azure DevOps work items",
    long_about = None
)]
struct Cli {
    /// Enable debug logging for rollup.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output (shorthand for `--format json`).
    #[arg(long, global = true)]
    json: bool,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Config file (default: ./rollup.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Recompute rollups and write them back",
        long_about = "Query the hierarchy, fetch field values, recompute every rollup \
                      and write changed items back in capped, concurrent batches.",
        after_help = "EXAMPLES:\n    # Preview without writing\n    rollup run --dry-run\n\n    # Write at most 50 items\n    rollup run --max-updates 50\n\n    # Emit machine-readable output\n    rollup run --json"
    )]
    Run(cmd::run::RunArgs),

    #[command(
        about = "Compute a rollup plan from a JSON export",
        long_about = "Compute rollups from a local JSON export and print what a run would write.",
        after_help = "EXAMPLES:\n    # Plan from an export\n    rollup plan --input tree.json\n\n    # Only RemainingWork, capped at 10\n    rollup plan --input tree.json --field Microsoft.VSTS.Scheduling.RemainingWork --max-updates 10"
    )]
    Plan(cmd::plan::PlanArgs),

    #[command(
        about = "Show the effective configuration",
        after_help = "EXAMPLES:\n    rollup config\n    rollup config --config ./ci/rollup.toml --json"
    )]
    Config(cmd::config::ConfigArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("ROLLUP_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "rollup=debug,info"
        } else {
            "rollup=info,warn"
        })
    });

    let format = env::var("ROLLUP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cwd = env::current_dir()?;
    let output = cli.output_mode();
    let config = cli.config.as_deref();
    debug!(?output, ?config, "starting");

    let command_result = match &cli.command {
        Commands::Run(args) => cmd::run::run_run(args, config, output, &cwd),
        Commands::Plan(args) => cmd::plan::run_plan(args, config, output, &cwd),
        Commands::Config(args) => cmd::config::run_config(args, config, output, &cwd),
    };

    if let Err(err) = command_result {
        render_error(output, &CliError::from(&err))?;
        std::process::exit(1);
    }
    Ok(())
}
